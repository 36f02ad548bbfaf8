//! Filesystem crawler
//!
//! Turns input arguments into a stream of [`CrawledEntry`] values:
//! - paths are walked with walkdir, files become entries and directories
//!   are only emitted when one of the grouping options asks for it
//! - in arbitrary-value mode each argument is parsed as `<size> <value>`
//!
//! The crawl runs on its own thread and feeds a bounded channel, so the
//! dispatcher consumes entries while the walk is still in progress.
//!
//! ```text
//!   input lines + args ──▶ crawler thread ──(bounded channel)──▶ dispatcher
//! ```

use crate::entry::parse_arbitrary_line;
use crate::input::{normalize_path_argument, InputArguments};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Capacity of the crawler channel
const CHANNEL_CAPACITY: usize = 4096;

/// Walk behavior
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOptions {
    /// Follow symbolic links
    pub follow_links: bool,
    /// Do not descend into directories on other filesystems
    pub one_filesystem: bool,
    /// Emit empty directories as zero-size entries
    pub empty_dirs: bool,
    /// Treat unreadable directories as empty
    pub dnr_empty: bool,
    /// Emit leaf directories as single entries sized by their files
    pub leaf_dirs: bool,
    /// Emit directories at this depth as single entries sized by their subtree
    pub dir_depth: Option<usize>,
    /// Emit paths relative to the crawled root
    pub relative: bool,
    /// Interpret arguments as `<size> <value>` records
    pub arbitrary_values: bool,
}

/// One entry produced by the crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledEntry {
    /// Path or arbitrary value
    pub path: String,
    /// Raw size in bytes
    pub size: u64,
    /// Whether this is a directory entry
    pub is_directory: bool,
}

/// Counters for a finished crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Entries emitted
    pub entries: u64,
    /// Arguments processed
    pub arguments: u64,
    /// Walk errors skipped
    pub errors: u64,
    /// Malformed arbitrary-value lines skipped
    pub parse_errors: u64,
    /// Whether the crawl stopped early on shutdown
    pub interrupted: bool,
}

/// Directory being walked, with what has been seen below it so far
struct Frame {
    path: PathBuf,
    depth: usize,
    /// Sum of file sizes below this directory
    size: u64,
    has_children: bool,
    has_subdirs: bool,
    unreadable: bool,
    /// Inside a depth-collapsed directory (or collapsed itself)
    collapsed: bool,
    /// Files held back while this may still be a leaf directory
    held: Vec<CrawledEntry>,
}

/// Walk state for one root
struct Walk<'a, F: FnMut(CrawledEntry) -> bool> {
    root: &'a Path,
    options: &'a CrawlOptions,
    emit: F,
    stack: Vec<Frame>,
    stats: CrawlStats,
    stopped: bool,
}

impl<'a, F: FnMut(CrawledEntry) -> bool> Walk<'a, F> {
    fn display(&self, path: &Path) -> String {
        if self.options.relative {
            match path.strip_prefix(self.root) {
                Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => path.to_string_lossy().into_owned(),
            }
        } else {
            path.to_string_lossy().into_owned()
        }
    }

    fn send(&mut self, entry: CrawledEntry) {
        if self.stopped {
            return;
        }
        self.stats.entries += 1;
        if !(self.emit)(entry) {
            self.stopped = true;
        }
    }

    /// Route an entry to the innermost frame that holds entries back, or emit it
    fn route(&mut self, entry: CrawledEntry) {
        if let Some(top) = self.stack.last_mut() {
            if self.options.leaf_dirs && !top.has_subdirs && !top.collapsed {
                top.held.push(entry);
                return;
            }
        }
        self.send(entry);
    }

    /// Close frames deeper than or at `depth`
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.last().is_some_and(|f| f.depth >= depth) {
            self.close_frame();
        }
    }

    fn close_frame(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };

        if let Some(parent) = self.stack.last_mut() {
            parent.size = parent.size.saturating_add(frame.size);
        }

        let is_collapse_root = frame.collapsed && self.options.dir_depth == Some(frame.depth);
        let parent_collapsed = self.stack.last().is_some_and(|p| p.collapsed);
        if parent_collapsed {
            return;
        }

        let path = self.display(&frame.path);
        if is_collapse_root {
            self.route(CrawledEntry {
                path,
                size: frame.size,
                is_directory: true,
            });
            return;
        }

        if frame.unreadable {
            if self.options.dnr_empty {
                self.route(CrawledEntry {
                    path,
                    size: 0,
                    is_directory: true,
                });
            }
            return;
        }

        if self.options.leaf_dirs && !frame.has_subdirs {
            self.route(CrawledEntry {
                path,
                size: frame.size,
                is_directory: true,
            });
            return;
        }

        if self.options.empty_dirs && !frame.has_children {
            self.route(CrawledEntry {
                path,
                size: 0,
                is_directory: true,
            });
        }
    }

    fn enter_dir(&mut self, path: PathBuf, depth: usize) {
        let parent_collapsed = match self.stack.last_mut() {
            Some(parent) => {
                parent.has_children = true;
                if !parent.has_subdirs {
                    parent.has_subdirs = true;
                    // No longer a leaf: release the files held so far
                    let held = std::mem::take(&mut parent.held);
                    for entry in held {
                        self.send(entry);
                    }
                }
                self.stack.last().is_some_and(|p| p.collapsed)
            }
            None => false,
        };

        let collapsed = parent_collapsed || self.options.dir_depth == Some(depth);
        self.stack.push(Frame {
            path,
            depth,
            size: 0,
            has_children: false,
            has_subdirs: false,
            unreadable: false,
            collapsed,
            held: Vec::new(),
        });
    }

    fn visit_file(&mut self, path: &Path, size: u64) {
        let collapsed = match self.stack.last_mut() {
            Some(parent) => {
                parent.has_children = true;
                parent.size = parent.size.saturating_add(size);
                parent.collapsed
            }
            None => false,
        };
        if collapsed {
            return;
        }
        let path = self.display(path);
        self.route(CrawledEntry {
            path,
            size,
            is_directory: false,
        });
    }

    fn run(mut self, shutdown: &AtomicBool) -> CrawlStats {
        let walker = WalkDir::new(self.root)
            .follow_links(self.options.follow_links)
            .same_file_system(self.options.one_filesystem)
            .sort_by_file_name();

        for item in walker {
            if self.stopped || shutdown.load(Ordering::Relaxed) {
                self.stats.interrupted = true;
                return self.stats;
            }

            match item {
                Ok(entry) => {
                    let depth = entry.depth();
                    self.unwind_to(depth);

                    if entry.file_type().is_dir() {
                        self.enter_dir(entry.into_path(), depth);
                        continue;
                    }

                    let size = match entry.metadata() {
                        Ok(meta) => meta.len(),
                        Err(e) => {
                            warn!(path = %entry.path().display(), "Cannot stat: {}", e);
                            self.stats.errors += 1;
                            continue;
                        }
                    };
                    self.visit_file(entry.path(), size);
                }
                Err(e) => {
                    // read_dir failures are reported right after their directory
                    let unreadable_top = match (e.path(), self.stack.last()) {
                        (Some(p), Some(top)) => p == top.path.as_path() && e.io_error().is_some(),
                        _ => false,
                    };
                    if unreadable_top {
                        if let Some(top) = self.stack.last_mut() {
                            top.unreadable = true;
                        }
                        if !self.options.dnr_empty {
                            warn!("{}", e);
                            self.stats.errors += 1;
                        }
                    } else {
                        warn!("{}", e);
                        self.stats.errors += 1;
                    }
                }
            }
        }

        self.unwind_to(0);
        self.stats
    }
}

/// Walk one root, calling `emit` for every entry
///
/// `emit` returns `false` to stop the walk.
pub fn crawl_path<F>(root: &Path, options: &CrawlOptions, shutdown: &AtomicBool, emit: F) -> CrawlStats
where
    F: FnMut(CrawledEntry) -> bool,
{
    debug!(root = %root.display(), "Crawling");
    Walk {
        root,
        options,
        emit,
        stack: Vec::new(),
        stats: CrawlStats::default(),
        stopped: false,
    }
    .run(shutdown)
}

/// Process every input argument, sending entries into `tx`
pub fn crawl_arguments(
    input: &mut InputArguments,
    options: &CrawlOptions,
    shutdown: &AtomicBool,
    tx: &Sender<CrawledEntry>,
) -> CrawlStats {
    let mut stats = CrawlStats::default();

    for arg in input.by_ref() {
        if shutdown.load(Ordering::Relaxed) {
            stats.interrupted = true;
            break;
        }
        stats.arguments += 1;

        if options.arbitrary_values {
            if arg.trim().is_empty() {
                continue;
            }
            match parse_arbitrary_line(&arg) {
                Ok((size, value)) => {
                    stats.entries += 1;
                    let entry = CrawledEntry {
                        path: value,
                        size,
                        is_directory: false,
                    };
                    if tx.send(entry).is_err() {
                        stats.interrupted = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    stats.parse_errors += 1;
                }
            }
            continue;
        }

        let Some(path) = normalize_path_argument(&arg) else {
            continue;
        };
        let mut disconnected = false;
        let walked = crawl_path(Path::new(&path), options, shutdown, |entry| {
            if tx.send(entry).is_err() {
                disconnected = true;
                return false;
            }
            true
        });
        stats.entries += walked.entries;
        stats.errors += walked.errors;
        if walked.interrupted || disconnected {
            stats.interrupted = true;
            break;
        }
    }

    stats.errors += input.line_errors();
    stats
}

/// Handle to a running crawler thread
pub struct Crawler {
    receiver: Receiver<CrawledEntry>,
    handle: JoinHandle<CrawlStats>,
}

impl Crawler {
    /// Receiving end of the entry channel
    pub fn receiver(&self) -> &Receiver<CrawledEntry> {
        &self.receiver
    }

    /// Wait for the thread and collect its counters
    ///
    /// The receiver is dropped first so a crawler blocked on a full
    /// channel observes the disconnect and stops.
    pub fn join(self) -> CrawlStats {
        let Crawler { receiver, handle } = self;
        drop(receiver);
        handle.join().unwrap_or_else(|_| {
            warn!("Crawler thread panicked");
            CrawlStats {
                interrupted: true,
                ..CrawlStats::default()
            }
        })
    }
}

/// Start the crawler thread
pub fn spawn_crawler(
    mut input: InputArguments,
    options: CrawlOptions,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<Crawler> {
    let (tx, receiver) = bounded(CHANNEL_CAPACITY);
    let handle = thread::Builder::new()
        .name("crawler".into())
        .spawn(move || crawl_arguments(&mut input, &options, &shutdown, &tx))?;
    Ok(Crawler { receiver, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn collect(root: &Path, options: &CrawlOptions) -> Vec<CrawledEntry> {
        let mut out = Vec::new();
        let shutdown = AtomicBool::new(false);
        crawl_path(root, options, &shutdown, |e| {
            out.push(e);
            true
        });
        out
    }

    fn names(entries: &[CrawledEntry]) -> Vec<(String, u64, bool)> {
        entries
            .iter()
            .map(|e| (e.path.clone(), e.size, e.is_directory))
            .collect()
    }

    /// root/{a(3), sub/{b(5), deep/{c(7)}}, empty/}
    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a"), b"aaa").unwrap();
        fs::create_dir_all(root.join("sub/deep")).unwrap();
        fs::write(root.join("sub/b"), b"bbbbb").unwrap();
        fs::write(root.join("sub/deep/c"), b"ccccccc").unwrap();
        fs::create_dir(root.join("empty")).unwrap();
        dir
    }

    fn relative() -> CrawlOptions {
        CrawlOptions {
            relative: true,
            ..CrawlOptions::default()
        }
    }

    #[test]
    fn test_files_only_by_default() {
        let dir = tree();
        let entries = collect(dir.path(), &relative());
        assert_eq!(
            names(&entries),
            vec![
                ("a".into(), 3, false),
                ("sub/b".into(), 5, false),
                ("sub/deep/c".into(), 7, false),
            ]
        );
    }

    #[test]
    fn test_empty_dirs() {
        let dir = tree();
        let options = CrawlOptions {
            empty_dirs: true,
            ..relative()
        };
        let entries = collect(dir.path(), &options);
        assert!(names(&entries).contains(&("empty".into(), 0, true)));
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_leaf_dirs() {
        let dir = tree();
        let options = CrawlOptions {
            leaf_dirs: true,
            empty_dirs: true,
            ..relative()
        };
        let entries = collect(dir.path(), &options);
        assert_eq!(
            names(&entries),
            vec![
                ("a".into(), 3, false),
                ("empty".into(), 0, true),
                ("sub/b".into(), 5, false),
                ("sub/deep".into(), 7, true),
            ]
        );
    }

    #[test]
    fn test_dir_depth_collapses_subtrees() {
        let dir = tree();
        let options = CrawlOptions {
            dir_depth: Some(1),
            ..relative()
        };
        let entries = collect(dir.path(), &options);
        assert_eq!(
            names(&entries),
            vec![
                ("a".into(), 3, false),
                ("empty".into(), 0, true),
                ("sub".into(), 12, true),
            ]
        );
    }

    #[test]
    fn test_absolute_paths() {
        let dir = tree();
        let entries = collect(&dir.path().join("sub"), &CrawlOptions::default());
        let expected = dir.path().join("sub/b").to_string_lossy().into_owned();
        assert_eq!(entries[0].path, expected);
    }

    #[test]
    fn test_single_file_root() {
        let dir = tree();
        let entries = collect(&dir.path().join("a"), &CrawlOptions::default());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 3);
    }

    #[test]
    fn test_missing_root_counts_error() {
        let shutdown = AtomicBool::new(false);
        let stats = crawl_path(
            Path::new("/nonexistent/partsync-root"),
            &CrawlOptions::default(),
            &shutdown,
            |_| true,
        );
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_arbitrary_values_over_channel() {
        let reader: Box<dyn std::io::BufRead + Send> =
            Box::new(std::io::Cursor::new("10 alpha\nbogus\n\n20 beta gamma\n"));
        let input = InputArguments::from_reader(Some(reader), Vec::new());
        let options = CrawlOptions {
            arbitrary_values: true,
            ..CrawlOptions::default()
        };
        let crawler = spawn_crawler(input, options, Arc::new(AtomicBool::new(false))).unwrap();
        let got: Vec<CrawledEntry> = crawler.receiver().iter().collect();
        let stats = crawler.join();

        assert_eq!(
            names(&got),
            vec![("alpha".into(), 10, false), ("beta gamma".into(), 20, false)]
        );
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.entries, 2);
    }

    #[test]
    fn test_shutdown_stops_walk() {
        let dir = tree();
        let shutdown = AtomicBool::new(true);
        let stats = crawl_path(dir.path(), &CrawlOptions::default(), &shutdown, |_| true);
        assert!(stats.interrupted);
        assert_eq!(stats.entries, 0);
    }
}
