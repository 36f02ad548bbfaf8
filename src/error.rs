//! Error types for partsync
//!
//! This module defines the error hierarchy for both halves of the tool:
//! - Entry and partitioning errors (allocation, malformed input, bad limits)
//! - Job queue and resume errors
//! - Hook and worker errors, which are logged rather than propagated
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Configuration and allocation errors abort the run before any work
//! - Per-entry and per-job errors are isolated and accumulated

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for partsync
#[derive(Error, Debug)]
pub enum PartError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Entry store errors
    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    /// Partition control errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Job queue and resume errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Hook errors (only surfaced when a caller asks for them)
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Worker and executor errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid size string or size knob
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    /// Two options that cannot be combined
    #[error("Option {0} is incompatible with {1}")]
    Incompatible(&'static str, &'static str),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// A path that must be absolute is not
    #[error("Path '{path}' must be absolute")]
    NotAbsolute { path: PathBuf },

    /// A directory argument that does not name a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// Invalid remote target
    #[error("Invalid remote target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Unknown copy tool
    #[error("Unknown copy tool '{0}' (expected rsync, cpio or tar)")]
    UnknownTool(String),

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Inconsistent partition control options
    #[error(transparent)]
    Partition(#[from] DispatchError),
}

/// Entry store errors
#[derive(Error, Debug)]
pub enum EntryError {
    /// Backing storage could not grow
    #[error("Cannot allocate memory for {what} ({requested} more items)")]
    Allocation { what: &'static str, requested: usize },

    /// An arbitrary-value input line did not parse as `<size> <value>`
    #[error("Error parsing input values '{line}': {reason}")]
    Parse { line: String, reason: String },
}

/// Partition control errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Fixed-count mode with a non-positive count
    #[error("Invalid partition count {0}: must be greater than 0")]
    InvalidPartitionCount(i64),

    /// Limit mode with neither limit configured
    #[error("Neither a file count limit nor a size limit was given")]
    NoLimits,

    /// A limit configured as zero
    #[error("Invalid {what} limit 0: must be greater than 0")]
    ZeroLimit { what: &'static str },

    /// Operation on a partition index that does not exist
    #[error("Partition {0} does not exist")]
    UnknownPartition(u32),

    /// Entry id not held by the store (released or never added)
    #[error("Entry {0} is not in the entry store")]
    UnknownEntry(u64),

    /// Too many partitions for a u32 index
    #[error("Partition index overflow")]
    IndexOverflow,
}

/// Job queue and resume errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue directory could not be created or read
    #[error("Queue directory '{path}': {reason}")]
    Directory { path: PathBuf, reason: String },

    /// Resume preconditions not met
    #[error("Run '{run}' is not resumable: {reason}")]
    NotResumable { run: String, reason: String },

    /// Run metadata is missing a key or holds an invalid value
    #[error("Invalid run metadata '{key}': {reason}")]
    Metadata { key: String, reason: String },

    /// Job file could not be written or moved
    #[error("Job '{job}': {reason}")]
    Job { job: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hook invocation errors. Never fatal to a dispatch pass.
#[derive(Error, Debug)]
pub enum HookError {
    /// Hook command could not be started
    #[error("Failed to start {kind} hook '{command}': {reason}")]
    Spawn {
        kind: &'static str,
        command: String,
        reason: String,
    },

    /// Hook command exited unsuccessfully
    #[error("{kind} hook '{command}' exited with status {status}")]
    Status {
        kind: &'static str,
        command: String,
        status: i32,
    },

    /// Job could not be enqueued
    #[error("Failed to enqueue job for partition {index}: {reason}")]
    Enqueue { index: u32, reason: String },
}

/// Worker and executor errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Process could not be started on a slot
    #[error("Failed to start job '{job}' on {slot}: {reason}")]
    SpawnFailed {
        job: String,
        slot: String,
        reason: String,
    },

    /// Required copy tool not found
    #[error("Tool '{tool}' not found on {target}")]
    ToolMissing { tool: String, target: String },
}

/// A job whose captured error output is non-empty
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[error("Job '{job}' produced {bytes} bytes of error output ({path})")]
pub struct JobFailure {
    /// Job name
    pub job: String,
    /// Size of the error artifact
    pub bytes: u64,
    /// Path to the error artifact
    pub path: PathBuf,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PartError>;

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type for hook invocations
pub type HookResult<T> = std::result::Result<T, HookError>;

impl From<serde_json::Error> for PartError {
    fn from(err: serde_json::Error) -> Self {
        PartError::Serialization(err.to_string())
    }
}

impl PartError {
    /// Whether this error came from the user's options rather than the run
    pub fn is_config(&self) -> bool {
        matches!(self, PartError::Config(_) | PartError::Dispatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PartError::from(DispatchError::NoLimits);
        assert!(err.to_string().contains("Neither a file count limit"));
        assert!(err.is_config());

        let err = PartError::from(QueueError::NotResumable {
            run: "r1".into(),
            reason: "crawl did not finish".into(),
        });
        assert!(err.to_string().contains("not resumable"));
        assert!(!err.is_config());
    }

    #[test]
    fn test_job_failure_display() {
        let failure = JobFailure {
            job: "job-00000003".into(),
            bytes: 12,
            path: PathBuf::from("/tmp/log/job-00000003.stderr"),
        };
        assert_eq!(
            failure.to_string(),
            "Job 'job-00000003' produced 12 bytes of error output (/tmp/log/job-00000003.stderr)"
        );
    }
}
