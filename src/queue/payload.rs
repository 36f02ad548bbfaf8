//! Job payloads
//!
//! Every job is a self-contained `/bin/sh` script: it redirects its own
//! output into the run's log directory, moves to the source root and runs
//! the copy tool over one partition listing. The same script runs locally
//! or is piped into `ssh <target> /bin/sh -s`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Copy tool run by each job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// `rsync --files-from`
    #[default]
    Rsync,
    /// `cpio -p` pass-through mode
    Cpio,
    /// `tar -c | tar -x` pipe
    Tar,
}

impl Tool {
    /// Program name looked up on PATH
    pub fn program(&self) -> &'static str {
        match self {
            Tool::Rsync => "rsync",
            Tool::Cpio => "cpio",
            Tool::Tar => "tar",
        }
    }

    /// Options used when none are given
    pub fn default_options(&self) -> &'static str {
        match self {
            Tool::Rsync => "-lptgoD -v --numeric-ids",
            Tool::Cpio => "-pdm",
            Tool::Tar => "--no-recursion",
        }
    }

    /// Tool invocation copying `listing` (relative paths) into `destination`
    ///
    /// `options` is inserted verbatim so several flags can be passed at once.
    pub fn command(&self, options: &str, listing: &Path, destination: &Path) -> String {
        let list = shell_quote(&listing.to_string_lossy());
        let dst = shell_quote(&format!("{}/", destination.to_string_lossy().trim_end_matches('/')));
        match self {
            Tool::Rsync => format!("rsync {} --files-from={} ./ {}", options, list, dst),
            Tool::Cpio => format!("cpio {} {} < {}", options, dst, list),
            Tool::Tar => format!(
                "tar -cf - {} -T {} | (cd {} && tar -xpf -)",
                options, list, dst
            ),
        }
    }
}

impl FromStr for Tool {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsync" => Ok(Tool::Rsync),
            "cpio" => Ok(Tool::Cpio),
            "tar" => Ok(Tool::Tar),
            other => Err(ConfigError::UnknownTool(other.to_string())),
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

/// Single-quote a string for `/bin/sh`
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Everything a job script needs besides the job name and listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    /// Copy tool
    pub tool: Tool,
    /// Tool options; `None` uses the tool's defaults
    pub options: Option<String>,
    /// Source root, listings are relative to it
    pub source: std::path::PathBuf,
    /// Destination root
    pub destination: std::path::PathBuf,
    /// Directory receiving `<job>.stdout` / `<job>.stderr`
    pub log_dir: std::path::PathBuf,
}

impl JobTemplate {
    /// Tool options in effect
    pub fn effective_options(&self) -> &str {
        self.options
            .as_deref()
            .unwrap_or_else(|| self.tool.default_options())
    }

    /// Render the script for `job` copying the entries listed in `listing`
    pub fn render(&self, job: &str, listing: &Path) -> String {
        let stdout = self.log_dir.join(format!("{}.stdout", job));
        let stderr = self.log_dir.join(format!("{}.stderr", job));
        let command = self
            .tool
            .command(self.effective_options(), listing, &self.destination);

        format!(
            "#!/bin/sh\n\
             # {job}\n\
             exec >{out} 2>{err}\n\
             cd {src} || exit 1\n\
             {command}\n",
            job = job,
            out = shell_quote(&stdout.to_string_lossy()),
            err = shell_quote(&stderr.to_string_lossy()),
            src = shell_quote(&self.source.to_string_lossy()),
            command = command,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn template(tool: Tool) -> JobTemplate {
        JobTemplate {
            tool,
            options: None,
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst"),
            log_dir: PathBuf::from("/run/log"),
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_tool_parse() {
        assert_eq!("tar".parse::<Tool>().unwrap(), Tool::Tar);
        assert!(matches!(
            "scp".parse::<Tool>(),
            Err(ConfigError::UnknownTool(t)) if t == "scp"
        ));
    }

    #[test]
    fn test_render_rsync() {
        let script = template(Tool::Rsync).render("job-00000001", Path::new("/run/parts/part.1"));
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines[0], "#!/bin/sh");
        assert_eq!(
            lines[2],
            "exec >'/run/log/job-00000001.stdout' 2>'/run/log/job-00000001.stderr'"
        );
        assert_eq!(lines[3], "cd '/src' || exit 1");
        assert_eq!(
            lines[4],
            "rsync -lptgoD -v --numeric-ids --files-from='/run/parts/part.1' ./ '/dst/'"
        );
    }

    #[test]
    fn test_render_tar_with_options() {
        let mut t = template(Tool::Tar);
        t.options = Some("--no-recursion --numeric-owner".into());
        let script = t.render("job-00000002", Path::new("/l"));
        assert!(script.contains(
            "tar -cf - --no-recursion --numeric-owner -T '/l' | (cd '/dst/' && tar -xpf -)"
        ));
    }

    #[test]
    fn test_render_cpio() {
        let script = template(Tool::Cpio).render("j", Path::new("/l"));
        assert!(script.contains("cpio -pdm '/dst/' < '/l'"));
    }

    #[test]
    fn test_tool_serde() {
        assert_eq!(serde_json::to_string(&Tool::Cpio).unwrap(), "\"cpio\"");
        let t: Tool = serde_json::from_str("\"rsync\"").unwrap();
        assert_eq!(t, Tool::Rsync);
    }
}
