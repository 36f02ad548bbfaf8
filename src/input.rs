//! Input arguments
//!
//! Arguments come from an input file (or stdin) first, one per line, and
//! then from the command line. Each one is either a path to crawl or, in
//! arbitrary-value mode, a `<size> <value>` record.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Where line-oriented input is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// Standard input
    Stdin,
    /// A named file
    File(PathBuf),
}

impl InputSource {
    /// Parse an input option; `-` means stdin
    pub fn from_option(value: &Path) -> Self {
        if value.as_os_str() == "-" {
            InputSource::Stdin
        } else {
            InputSource::File(value.to_path_buf())
        }
    }

    /// Open the source for buffered line reading
    pub fn open(&self) -> io::Result<Box<dyn BufRead + Send>> {
        match self {
            InputSource::Stdin => Ok(Box::new(BufReader::new(io::stdin()))),
            InputSource::File(path) => {
                let file = File::open(path).map_err(|e| {
                    io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputSource::Stdin => f.write_str("stdin"),
            InputSource::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Collapse repeated trailing slashes into one; empty arguments yield `None`
pub fn normalize_path_argument(arg: &str) -> Option<String> {
    if arg.is_empty() {
        return None;
    }
    let trimmed = arg.trim_end_matches('/');
    if trimmed.len() == arg.len() {
        return Some(arg.to_string());
    }
    Some(format!("{}/", trimmed))
}

/// Opened input: lines of the input source followed by command-line arguments
pub struct InputArguments {
    reader: Option<Box<dyn BufRead + Send>>,
    args: std::vec::IntoIter<String>,
    line_errors: u64,
}

impl InputArguments {
    /// Open `source` (if any) and queue `args` behind it
    ///
    /// Fails only if the input source cannot be opened.
    pub fn open(source: Option<&InputSource>, args: Vec<String>) -> io::Result<Self> {
        let reader = source.map(|s| s.open()).transpose()?;
        Ok(Self::from_reader(reader, args))
    }

    /// Build from an already opened reader
    pub fn from_reader(reader: Option<Box<dyn BufRead + Send>>, args: Vec<String>) -> Self {
        Self {
            reader,
            args: args.into_iter(),
            line_errors: 0,
        }
    }

    /// Number of input lines that could not be read
    pub fn line_errors(&self) -> u64 {
        self.line_errors
    }
}

impl Iterator for InputArguments {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if let Some(reader) = self.reader.as_mut() {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => self.reader = None,
                Ok(_) => {
                    let end = line.trim_end_matches(['\n', '\r']).len();
                    line.truncate(end);
                    return Some(line);
                }
                Err(e) => {
                    tracing::warn!("Error reading from input stream: {}", e);
                    self.line_errors += 1;
                    self.reader = None;
                }
            }
        }
        self.args.next()
    }
}
