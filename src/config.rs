//! Configuration types for partsync
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Human-readable size parsing
//! - Validated, immutable configurations for the `part` and `sync` commands
//!
//! All cross-option rules are checked here, once, before any work starts.

use crate::crawl::CrawlOptions;
use crate::entry::SizeTransform;
use crate::error::{ConfigError, DispatchError};
use crate::input::{normalize_path_argument, InputSource};
use crate::partition::{Limits, ListingTarget, PartitionMode};
use crate::queue::{RunLayout, RunMetadata, Tool};
use crate::worker::DEFAULT_POLL_INTERVAL;
use chrono::Utc;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Default entry limit per sync partition
pub const DEFAULT_SYNC_MAX_ENTRIES: u64 = 2000;

/// Default size limit per sync partition (4 GiB)
pub const DEFAULT_SYNC_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Default shared work directory
pub const DEFAULT_WORKDIR: &str = "/tmp/partsync";

/// Regex for human-readable sizes: `4096`, `64K`, `4GiB`
static SIZE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s*([kKmMgGtTpP]?)(?:i?[bB])?$").expect("Invalid size regex")
});

/// Regex for remote targets: `host` or `user@host`
static TARGET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9._-]+@)?[A-Za-z0-9][A-Za-z0-9.:_-]*$")
        .expect("Invalid target regex")
});

/// Partition huge directory trees and copy them with parallel jobs
#[derive(Parser, Debug, Clone)]
#[command(
    name = "partsync",
    version,
    about = "Partition huge directory trees into balanced lists and run parallel copy jobs over them",
    long_about = "Crawls one or more directory trees and splits the entries into partitions, \
                  either a fixed number of balanced partitions or as many as per-partition \
                  limits require.\n\n\
                  The 'sync' command streams each closed partition into a job queue and runs \
                  copy jobs (rsync, cpio or tar) over them on a bounded pool of local or \
                  remote workers, while the crawl is still going.",
    after_help = "EXAMPLES:\n    \
        partsync part -n 8 -o /tmp/parts /data\n    \
        find /data -type f | partsync part -f 10000\n    \
        partsync part -L -f 2000 -o /tmp/parts -W 'wc -l $PARTSYNC_PART_FILE' /data\n    \
        partsync sync -n 8 /data /mnt/backup\n    \
        partsync sync -n 16 -w node1 -w node2 -d /shared/partsync /data /mnt/backup\n    \
        partsync sync -r 20240101-120000-1a2b3c4d\n    \
        partsync status 20240101-120000-1a2b3c4d --format json"
)]
pub struct CliArgs {
    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Split entries into partitions and print or write their listings
    Part(PartArgs),

    /// Copy a tree with parallel jobs, one per partition
    Sync(SyncArgs),

    /// Show the state of a sync run
    Status(StatusArgs),
}

/// Options of the `part` command
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PartArgs {
    /// Paths to crawl (or `<size> <value>` records with -a)
    #[arg(value_name = "PATH")]
    pub paths: Vec<String>,

    /// Number of partitions
    #[arg(short = 'n', long, value_name = "NUM", allow_negative_numbers = true)]
    pub partitions: Option<i64>,

    /// Maximum number of entries per partition
    #[arg(short = 'f', long, value_name = "NUM")]
    pub max_files: Option<u64>,

    /// Maximum size per partition (e.g. 4G)
    #[arg(short = 's', long, value_name = "SIZE")]
    pub max_size: Option<String>,

    /// Read paths (or records) from FILE, one per line; '-' for stdin
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Input is `<size> <value>` records instead of paths
    #[arg(short = 'a', long)]
    pub arbitrary: bool,

    /// Write partition N to TEMPLATE.N; '-' for stdout
    #[arg(short = 'o', long, value_name = "TEMPLATE")]
    pub output: Option<PathBuf>,

    /// Add a trailing slash to directories
    #[arg(short = 'e', long)]
    pub add_slash: bool,

    /// Include empty directories
    #[arg(short = 'z', long)]
    pub empty_dirs: bool,

    /// Treat unreadable directories as empty (implies -z)
    #[arg(short = 'Z', long)]
    pub unreadable_empty: bool,

    /// Group leaf directories as single entries (implies -z)
    #[arg(short = 'D', long)]
    pub leaf_dirs: bool,

    /// Show directories at DEPTH as single entries
    #[arg(short = 'd', long, value_name = "DEPTH")]
    pub dir_depth: Option<usize>,

    /// Live mode: close and hand over partitions while crawling
    #[arg(short = 'L', long)]
    pub live: bool,

    /// Command run before each partition opens (live mode)
    #[arg(short = 'w', long, value_name = "CMD")]
    pub pre_open: Option<String>,

    /// Command run after each partition closes (live mode)
    #[arg(short = 'W', long, value_name = "CMD")]
    pub post_close: Option<String>,

    /// Follow symbolic links
    #[arg(short = 'l', long)]
    pub follow_links: bool,

    /// Stay on one filesystem
    #[arg(short = 'x', long)]
    pub one_file_system: bool,

    /// Preload each partition with SIZE
    #[arg(short = 'p', long, value_name = "SIZE")]
    pub preload: Option<String>,

    /// Overload each entry with SIZE
    #[arg(short = 'q', long, value_name = "SIZE")]
    pub overload: Option<String>,

    /// Round entry sizes up to a multiple of SIZE
    #[arg(short = 'r', long, value_name = "SIZE")]
    pub round: Option<String>,
}

/// Options of the `sync` command
#[derive(clap::Args, Debug, Clone)]
pub struct SyncArgs {
    /// Absolute source directory
    #[arg(value_name = "SRC", required_unless_present = "resume")]
    pub source: Option<PathBuf>,

    /// Absolute destination directory
    #[arg(value_name = "DST", required_unless_present = "resume")]
    pub destination: Option<PathBuf>,

    /// Number of concurrent jobs [default: number of CPUs]
    #[arg(short = 'n', long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Maximum number of entries per job
    #[arg(short = 'f', long, default_value_t = DEFAULT_SYNC_MAX_ENTRIES, value_name = "NUM")]
    pub max_files: u64,

    /// Maximum size per job (e.g. 4G)
    #[arg(short = 's', long, default_value = "4G", value_name = "SIZE")]
    pub max_size: String,

    /// Run jobs on TARGET ([user@]host) over ssh; repeat for several hosts
    #[arg(short = 'w', long = "remote", value_name = "TARGET", action = clap::ArgAction::Append)]
    pub remote_targets: Vec<String>,

    /// Shared work directory holding runs
    #[arg(short = 'd', long, env = "PARTSYNC_WORKDIR", default_value = DEFAULT_WORKDIR, value_name = "DIR")]
    pub workdir: PathBuf,

    /// Copy tool: rsync, cpio or tar
    #[arg(short = 't', long, default_value = "rsync", value_name = "TOOL")]
    pub tool: String,

    /// Options passed to the copy tool, replacing its defaults
    #[arg(short = 'o', long, value_name = "OPTS", allow_hyphen_values = true)]
    pub tool_options: Option<String>,

    /// Resume run RUN
    #[arg(short = 'r', long, value_name = "RUN", conflicts_with_all = ["source", "destination"])]
    pub resume: Option<String>,

    /// Follow symbolic links
    #[arg(short = 'l', long)]
    pub follow_links: bool,

    /// Stay on one filesystem
    #[arg(short = 'x', long)]
    pub one_file_system: bool,

    /// Copy empty directories too
    #[arg(short = 'z', long)]
    pub empty_dirs: bool,

    /// Milliseconds between dispatch loop iterations
    #[arg(long, default_value = "200", value_name = "MS")]
    pub poll_interval: u64,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Output format of the `status` command
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON document
    Json,
}

/// Options of the `status` command
#[derive(clap::Args, Debug, Clone)]
pub struct StatusArgs {
    /// Run name
    #[arg(value_name = "RUN")]
    pub run: String,

    /// Shared work directory holding runs
    #[arg(short = 'd', long, env = "PARTSYNC_WORKDIR", default_value = DEFAULT_WORKDIR, value_name = "DIR")]
    pub workdir: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = StatusFormat::Text)]
    pub format: StatusFormat,
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

/// Parse a size such as `4096`, `64K`, `4G` or `2TiB` (binary units)
pub fn parse_size(value: &str) -> Result<u64, ConfigError> {
    let value = value.trim();
    let caps = SIZE_REGEX
        .captures(value)
        .ok_or_else(|| ConfigError::InvalidSize(format!("'{}' is not a size", value)))?;

    let number: u64 = caps[1]
        .parse()
        .map_err(|_| ConfigError::InvalidSize(format!("'{}' is too large", value)))?;
    let shift = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()).as_deref() {
        Some("K") => 10,
        Some("M") => 20,
        Some("G") => 30,
        Some("T") => 40,
        Some("P") => 50,
        _ => 0,
    };

    number
        .checked_mul(1u64 << shift)
        .ok_or_else(|| ConfigError::InvalidSize(format!("'{}' is too large", value)))
}

/// Parse an optional size knob that must exceed `min`
fn size_knob(value: Option<&str>, option: &str, min: u64) -> Result<Option<u64>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let size = parse_size(value)?;
    if size <= min {
        return Err(ConfigError::InvalidSize(format!(
            "option {} requires a value greater than {}",
            option, min
        )));
    }
    Ok(Some(size))
}

/// Validate a remote shell target
pub fn validate_target(target: &str) -> Result<(), ConfigError> {
    if TARGET_REGEX.is_match(target) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTarget {
            target: target.to_string(),
            reason: "expected [user@]host".into(),
        })
    }
}

/// Fresh run name: UTC timestamp plus a short random suffix
pub fn new_run_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &id[..8])
}

/// Validated configuration of the `part` command
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Dispatch mode
    pub mode: PartitionMode,
    /// Size transform
    pub transform: SizeTransform,
    /// Crawl options
    pub crawl: CrawlOptions,
    /// Line-oriented input, if any
    pub input: Option<InputSource>,
    /// Command-line arguments, normalized
    pub paths: Vec<String>,
    /// Where listings go
    pub output: ListingTarget,
    /// Trailing slash on directories in listings
    pub add_slash: bool,
    /// Live mode
    pub live: bool,
    /// Pre-open hook command
    pub pre_open: Option<String>,
    /// Post-close hook command
    pub post_close: Option<String>,
}

impl PartitionConfig {
    /// Create and validate configuration from `part` arguments
    pub fn from_part_args(args: PartArgs) -> Result<Self, ConfigError> {
        let max_size = args.max_size.as_deref().map(parse_size).transpose()?;

        let mode = match args.partitions {
            Some(_) if args.max_files.is_some() || max_size.is_some() || args.live => {
                return Err(ConfigError::Incompatible("-n", "-f, -s and -L"));
            }
            Some(n) => {
                let count = u32::try_from(n)
                    .ok()
                    .filter(|&c| c > 0)
                    .ok_or(DispatchError::InvalidPartitionCount(n))?;
                PartitionMode::Count(count)
            }
            None if args.max_files.is_none() && max_size.is_none() => {
                return Err(ConfigError::MissingRequired("one of -n, -f or -s".into()));
            }
            None => {
                let limits = Limits {
                    max_entries: args.max_files,
                    max_size,
                };
                limits.validate()?;
                PartitionMode::Limits(limits)
            }
        };

        let pre_open = args.pre_open.filter(|c| !c.is_empty());
        let post_close = args.post_close.filter(|c| !c.is_empty());
        if !args.live && (pre_open.is_some() || post_close.is_some()) {
            return Err(ConfigError::MissingRequired(
                "hooks can only be used with -L".into(),
            ));
        }

        let transform = SizeTransform::new(
            size_knob(args.preload.as_deref(), "-p", 0)?.unwrap_or(0),
            size_knob(args.overload.as_deref(), "-q", 0)?.unwrap_or(0),
            size_knob(args.round.as_deref(), "-r", 1)?.unwrap_or(1),
        )?;

        let crawl = CrawlOptions {
            follow_links: args.follow_links,
            one_filesystem: args.one_file_system,
            empty_dirs: args.empty_dirs || args.unreadable_empty || args.leaf_dirs,
            dnr_empty: args.unreadable_empty,
            leaf_dirs: args.leaf_dirs,
            dir_depth: args.dir_depth,
            relative: false,
            arbitrary_values: args.arbitrary,
        };

        let paths: Vec<String> = if args.arbitrary {
            args.paths
        } else {
            args.paths
                .iter()
                .filter_map(|p| normalize_path_argument(p))
                .collect()
        };

        let input = match args.input.as_deref() {
            Some(p) if p.as_os_str().is_empty() => None,
            Some(p) => Some(InputSource::from_option(p)),
            None => None,
        };
        // No input file and no arguments: read stdin
        let input = match input {
            None if paths.is_empty() => Some(InputSource::Stdin),
            other => other,
        };

        let output = ListingTarget::from_option(args.output.as_deref());
        if let ListingTarget::Template(template) = &output {
            if let Some(parent) = template.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(ConfigError::InvalidOutputPath {
                        path: template.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        Ok(Self {
            mode,
            transform,
            crawl,
            input,
            paths,
            output,
            add_slash: args.add_slash,
            live: args.live,
            pre_open,
            post_close,
        })
    }
}

/// Validated configuration of the `sync` command
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Run name
    pub run: String,
    /// Absolute work directory holding runs
    pub workdir: PathBuf,
    /// Continue an existing run instead of starting one
    pub resume: bool,
    /// Concurrent jobs
    pub workers: usize,
    /// Per-job limits
    pub limits: Limits,
    /// Copy tool
    pub tool: Tool,
    /// Tool options replacing the defaults
    pub tool_options: Option<String>,
    /// Absolute source root
    pub source: PathBuf,
    /// Absolute destination root
    pub destination: PathBuf,
    /// Remote shell targets; empty runs jobs locally
    pub remote_targets: Vec<String>,
    /// Crawl options
    pub crawl: CrawlOptions,
    /// Delay between dispatch loop iterations
    pub poll_interval: Duration,
    /// Show the progress line
    pub show_progress: bool,
    explicit_workers: bool,
}

fn absolute_dir(path: &Path, must_exist: bool) -> Result<PathBuf, ConfigError> {
    if !path.is_absolute() {
        return Err(ConfigError::NotAbsolute {
            path: path.to_path_buf(),
        });
    }
    if must_exist && !path.is_dir() {
        return Err(ConfigError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(path.to_path_buf())
}

impl SyncConfig {
    /// Create and validate configuration from `sync` arguments
    ///
    /// For a resumed run, source, destination and job settings are
    /// placeholders until [`SyncConfig::apply_metadata`] is called.
    pub fn from_sync_args(args: SyncArgs) -> Result<Self, ConfigError> {
        let workers = args.workers.unwrap_or_else(default_workers);
        if workers == 0 || workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: workers,
                max: MAX_WORKERS,
            });
        }

        let limits = Limits {
            max_entries: Some(args.max_files),
            max_size: Some(parse_size(&args.max_size)?),
        };
        limits.validate()?;

        let tool: Tool = args.tool.parse()?;
        for target in &args.remote_targets {
            validate_target(target)?;
        }

        let workdir = std::path::absolute(&args.workdir).map_err(|e| {
            ConfigError::InvalidOutputPath {
                path: args.workdir.clone(),
                reason: e.to_string(),
            }
        })?;
        if !args.remote_targets.is_empty() && !args.workdir.is_absolute() {
            return Err(ConfigError::NotAbsolute {
                path: args.workdir.clone(),
            });
        }

        let (run, resume) = match &args.resume {
            Some(run) if run.is_empty() || run.contains('/') => {
                return Err(ConfigError::MissingRequired("a run name for -r".into()));
            }
            Some(run) => (run.clone(), true),
            None => (new_run_name(), false),
        };

        let (source, destination) = if resume {
            (PathBuf::new(), PathBuf::new())
        } else {
            let source = args
                .source
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired("source directory".into()))?;
            let destination = args
                .destination
                .as_deref()
                .ok_or_else(|| ConfigError::MissingRequired("destination directory".into()))?;
            (
                absolute_dir(source, true)?,
                // The destination may only exist on the remote targets
                absolute_dir(destination, args.remote_targets.is_empty())?,
            )
        };

        Ok(Self {
            run,
            workdir,
            resume,
            workers,
            explicit_workers: args.workers.is_some(),
            limits,
            tool,
            tool_options: args.tool_options.filter(|o| !o.is_empty()),
            source,
            destination,
            remote_targets: args.remote_targets,
            crawl: CrawlOptions {
                follow_links: args.follow_links,
                one_filesystem: args.one_file_system,
                empty_dirs: args.empty_dirs,
                relative: true,
                ..CrawlOptions::default()
            },
            poll_interval: if args.poll_interval == 0 {
                DEFAULT_POLL_INTERVAL
            } else {
                Duration::from_millis(args.poll_interval)
            },
            show_progress: !args.quiet,
        })
    }

    /// Directory layout of this run
    pub fn layout(&self) -> RunLayout {
        RunLayout::new(&self.workdir, &self.run)
    }

    /// Metadata recorded when the run starts
    pub fn to_metadata(&self) -> RunMetadata {
        RunMetadata {
            run: self.run.clone(),
            workers: self.workers,
            tool: self.tool,
            tool_options: self.tool_options.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            remote_targets: self.remote_targets.clone(),
            max_entries: self.limits.max_entries,
            max_size: self.limits.max_size,
            started_at: Utc::now(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Take the job settings of a resumed run from its metadata
    ///
    /// A worker count given on the command line wins over the recorded one.
    pub fn apply_metadata(&mut self, meta: &RunMetadata) {
        if !self.explicit_workers {
            self.workers = meta.workers;
        }
        self.tool = meta.tool;
        self.tool_options = meta.tool_options.clone();
        self.source = meta.source.clone();
        self.destination = meta.destination.clone();
        self.remote_targets = meta.remote_targets.clone();
        if meta.max_entries.is_some() || meta.max_size.is_some() {
            self.limits = Limits {
                max_entries: meta.max_entries,
                max_size: meta.max_size,
            };
        }
    }
}
