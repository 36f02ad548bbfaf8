//! Run status
//!
//! Reads a run directory without changing it: job counts, flags, failed
//! jobs and the recorded metadata.

use crate::error::{JobFailure, QueueError, Result};
use crate::queue::{Flag, JobQueue, QueueState, RunLayout, RunMetadata};
use crate::sync::audit_failures;
use serde::Serialize;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;

/// Snapshot of a run directory
#[derive(Debug, Clone, Serialize)]
pub struct RunOverview {
    /// Run name
    pub run: String,
    /// Run directory
    pub run_dir: PathBuf,
    /// Queue state from the flags
    pub state: QueueState,
    /// Jobs waiting in `queue/`
    pub pending: usize,
    /// Jobs in `work/` (running or done)
    pub claimed: usize,
    /// Partition listings written
    pub partitions: usize,
    /// Flag files present
    pub crawl_finished: bool,
    pub stop_requested: bool,
    pub consumer_finished: bool,
    /// Whether `sync -r` would accept this run
    pub resumable: bool,
    /// Jobs with non-empty error output
    pub failures: Vec<JobFailure>,
    /// Recorded metadata, when readable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RunMetadata>,
}

impl RunOverview {
    /// Inspect the run at `layout`
    pub fn collect(layout: &RunLayout) -> Result<Self> {
        if !layout.exists() {
            return Err(QueueError::Directory {
                path: layout.root().to_path_buf(),
                reason: "no such run".into(),
            }
            .into());
        }

        let queue = JobQueue::new(layout.clone());
        let partitions = match fs::read_dir(layout.parts_dir()) {
            Ok(dir) => dir.filter_map(|e| e.ok()).count(),
            Err(_) => 0,
        };
        let crawl_finished = queue.has_flag(Flag::CrawlFinished);
        let consumer_finished = queue.has_flag(Flag::ConsumerFinished);

        Ok(Self {
            run: layout.name(),
            run_dir: layout.root().to_path_buf(),
            state: queue.state(),
            pending: queue.pending()?.len(),
            claimed: queue.claimed()?.len(),
            partitions,
            crawl_finished,
            stop_requested: queue.has_flag(Flag::StopRequested),
            consumer_finished,
            resumable: crawl_finished && !consumer_finished,
            failures: audit_failures(&layout.log_dir()).unwrap_or_default(),
            metadata: RunMetadata::load(layout.root()).ok(),
        })
    }

    /// Human-readable report
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run:         {}", self.run);
        let _ = writeln!(out, "Directory:   {}", self.run_dir.display());
        let _ = writeln!(out, "State:       {}", self.state);
        if let Some(meta) = &self.metadata {
            let _ = writeln!(
                out,
                "Copy:        {} -> {} ({}, {} workers)",
                meta.source.display(),
                meta.destination.display(),
                meta.tool,
                meta.workers
            );
            if !meta.remote_targets.is_empty() {
                let _ = writeln!(out, "Targets:     {}", meta.remote_targets.join(", "));
            }
            let _ = writeln!(out, "Started:     {}", meta.started_at.to_rfc3339());
        }
        let _ = writeln!(out, "Partitions:  {}", self.partitions);
        let _ = writeln!(out, "Pending:     {}", self.pending);
        let _ = writeln!(out, "Claimed:     {}", self.claimed);
        let _ = writeln!(out, "Resumable:   {}", if self.resumable { "yes" } else { "no" });
        let _ = writeln!(out, "Failed jobs: {}", self.failures.len());
        for failure in &self.failures {
            let _ = writeln!(out, "  {}", failure);
        }
        out
    }

    /// JSON document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
