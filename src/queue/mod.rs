//! Filesystem job queue
//!
//! A run directory holds everything a run needs, so a run can be inspected
//! with `ls` and resumed after a crash:
//!
//! ```text
//!   <workdir>/<run>/
//!     run.json        run metadata
//!     queue/          pending jobs, plus the control flags (dotfiles)
//!     work/           claimed jobs
//!     parts/          partition listings
//!     log/            <job>.stdout / <job>.stderr
//! ```
//!
//! Job state is directory membership: a job is pending while it sits in
//! `queue/`, claimed once renamed into `work/`, and done when its process
//! has exited (inferred from its log artifacts).
//!
//! Queue order is modification time with the job name as tie-breaker. This
//! relies on the filesystem recording sub-second mtimes.

pub mod metadata;
pub mod payload;

pub use metadata::RunMetadata;
pub use payload::{shell_quote, JobTemplate, Tool};

use crate::error::{QueueError, QueueResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Name of the job with creation ordinal `ordinal`
pub fn job_name(ordinal: u64) -> String {
    format!("job-{:08}", ordinal)
}

/// Directory layout of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    /// Layout of run `name` under `workdir`
    pub fn new(workdir: &Path, name: &str) -> Self {
        Self {
            root: workdir.join(name),
        }
    }

    /// Layout rooted at an existing run directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Run directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run name (last path component)
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Pending jobs and flags
    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    /// Claimed jobs
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Partition listings
    pub fn parts_dir(&self) -> PathBuf {
        self.root.join("parts")
    }

    /// Job output
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    /// Whether the run directory exists
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Create every directory of the layout
    pub fn create(&self) -> QueueResult<()> {
        for dir in [
            self.root.clone(),
            self.queue_dir(),
            self.work_dir(),
            self.parts_dir(),
            self.log_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| QueueError::Directory {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Zero-byte control markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// The producer dispatched every entry and closed every partition
    CrawlFinished,
    /// An interrupt asked the consumer to stop submitting jobs
    StopRequested,
    /// The consumer ran every job to completion
    ConsumerFinished,
}

impl Flag {
    /// File name inside `queue/`
    pub fn file_name(&self) -> &'static str {
        match self {
            Flag::CrawlFinished => ".crawl-finished",
            Flag::StopRequested => ".stop-requested",
            Flag::ConsumerFinished => ".consumer-finished",
        }
    }
}

/// Queue state derived from the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueState {
    /// Producer still running
    Pending,
    /// No more jobs will be enqueued
    CrawlDone,
    /// Submission halted
    StopRequested,
    /// Every job ran
    ConsumerDone,
}

impl QueueState {
    /// Resolve the flags, highest precedence first
    pub fn from_flags(crawl_finished: bool, stop_requested: bool, consumer_finished: bool) -> Self {
        if consumer_finished {
            QueueState::ConsumerDone
        } else if stop_requested {
            QueueState::StopRequested
        } else if crawl_finished {
            QueueState::CrawlDone
        } else {
            QueueState::Pending
        }
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QueueState::Pending => "pending",
            QueueState::CrawlDone => "crawl-done",
            QueueState::StopRequested => "stop-requested",
            QueueState::ConsumerDone => "consumer-done",
        })
    }
}

/// A job moved into `work/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    /// Job name
    pub name: String,
    /// Script path inside `work/`
    pub path: PathBuf,
}

/// Directory-backed FIFO of job scripts
#[derive(Debug, Clone)]
pub struct JobQueue {
    layout: RunLayout,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Job files of `dir`, oldest first, ties broken by name
fn list_jobs(dir: &Path) -> QueueResult<Vec<(SystemTime, String)>> {
    let mut jobs = Vec::new();
    let read = fs::read_dir(dir).map_err(|e| QueueError::Directory {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    for entry in read {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        // A job claimed by someone else between readdir and stat
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            continue;
        }
        jobs.push((meta.modified()?, name));
    }

    jobs.sort();
    Ok(jobs)
}

impl JobQueue {
    /// Queue of an existing (or just created) run layout
    pub fn new(layout: RunLayout) -> Self {
        Self { layout }
    }

    /// Create the layout and open its queue
    pub fn create(layout: RunLayout) -> QueueResult<Self> {
        layout.create()?;
        Ok(Self::new(layout))
    }

    /// Run layout
    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    fn flag_path(&self, flag: Flag) -> PathBuf {
        self.layout.queue_dir().join(flag.file_name())
    }

    /// Enqueue a job script under `name`
    ///
    /// The script is written to a hidden temporary file first, so a
    /// concurrent dequeue never sees a partial job.
    pub fn enqueue(&self, name: &str, script: &str) -> QueueResult<PathBuf> {
        let dir = self.layout.queue_dir();
        let tmp = dir.join(format!(".{}.tmp", name));
        let dest = dir.join(name);

        fs::write(&tmp, script).map_err(|e| QueueError::Job {
            job: name.to_string(),
            reason: format!("cannot write '{}': {}", tmp.display(), e),
        })?;
        fs::rename(&tmp, &dest).map_err(|e| QueueError::Job {
            job: name.to_string(),
            reason: format!("cannot move into queue: {}", e),
        })?;

        debug!(job = name, "Enqueued");
        Ok(dest)
    }

    /// Pending job names, in queue order
    pub fn pending(&self) -> QueueResult<Vec<String>> {
        Ok(list_jobs(&self.layout.queue_dir())?
            .into_iter()
            .map(|(_, name)| name)
            .collect())
    }

    /// Claimed job names, oldest first
    pub fn claimed(&self) -> QueueResult<Vec<String>> {
        Ok(list_jobs(&self.layout.work_dir())?
            .into_iter()
            .map(|(_, name)| name)
            .collect())
    }

    /// Claim the oldest pending job
    ///
    /// Returns `None` when nothing is pending. A job that disappears
    /// between listing and rename is skipped.
    pub fn dequeue(&self) -> QueueResult<Option<ClaimedJob>> {
        let queue_dir = self.layout.queue_dir();
        let work_dir = self.layout.work_dir();

        for (_, name) in list_jobs(&queue_dir)? {
            let dest = work_dir.join(&name);
            match fs::rename(queue_dir.join(&name), &dest) {
                Ok(()) => {
                    debug!(job = %name, "Claimed");
                    return Ok(Some(ClaimedJob { name, path: dest }));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(QueueError::Job {
                        job: name,
                        reason: format!("cannot claim: {}", e),
                    })
                }
            }
        }
        Ok(None)
    }

    /// Create a flag; setting it twice is harmless
    pub fn set_flag(&self, flag: Flag) -> QueueResult<()> {
        fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(self.flag_path(flag))?;
        Ok(())
    }

    /// Whether a flag is present
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flag_path(flag).exists()
    }

    /// Remove a flag if present
    pub fn clear_flag(&self, flag: Flag) -> QueueResult<()> {
        match fs::remove_file(self.flag_path(flag)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current state from the flags
    pub fn state(&self) -> QueueState {
        QueueState::from_flags(
            self.has_flag(Flag::CrawlFinished),
            self.has_flag(Flag::StopRequested),
            self.has_flag(Flag::ConsumerFinished),
        )
    }

    /// Move the `count` most recently claimed jobs back to pending
    ///
    /// Returns the requeued names, oldest first. Jobs keep their mtime so
    /// they are picked up again before anything enqueued later.
    pub fn requeue_recent(&self, count: usize) -> QueueResult<Vec<String>> {
        let claimed = list_jobs(&self.layout.work_dir())?;
        let skip = claimed.len().saturating_sub(count);
        let mut moved = Vec::new();

        for (_, name) in claimed.into_iter().skip(skip) {
            match fs::rename(
                self.layout.work_dir().join(&name),
                self.layout.queue_dir().join(&name),
            ) {
                Ok(()) => moved.push(name),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(moved)
    }

    /// Get an interrupted run ready to continue
    ///
    /// Requires a completed crawl and an unfinished consumer. Jobs that may
    /// have been running when the run stopped (at most `window`, the
    /// previous worker count) are requeued and the stop flag is cleared.
    /// Nothing is changed when a precondition fails.
    pub fn prepare_resume(&self, window: usize) -> QueueResult<Vec<String>> {
        let run = self.layout.name();
        if !self.layout.exists() {
            return Err(QueueError::NotResumable {
                run,
                reason: "run directory does not exist".into(),
            });
        }
        if !self.has_flag(Flag::CrawlFinished) {
            return Err(QueueError::NotResumable {
                run,
                reason: "the crawl did not finish".into(),
            });
        }
        if self.has_flag(Flag::ConsumerFinished) {
            return Err(QueueError::NotResumable {
                run,
                reason: "every job already ran".into(),
            });
        }

        let requeued = self.requeue_recent(window)?;
        self.clear_flag(Flag::StopRequested)?;
        info!(run = %run, requeued = requeued.len(), "Resuming run");
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    fn queue() -> (tempfile::TempDir, JobQueue) {
        let dir = tempdir().unwrap();
        let q = JobQueue::create(RunLayout::new(dir.path(), "run")).unwrap();
        (dir, q)
    }

    fn touch_at(path: &Path, secs: i64) {
        set_file_mtime(path, FileTime::from_unix_time(1_700_000_000 + secs, 0)).unwrap();
    }

    #[test]
    fn test_layout() {
        let (dir, q) = queue();
        let layout = q.layout();
        assert_eq!(layout.root(), dir.path().join("run"));
        assert_eq!(layout.name(), "run");
        for d in [layout.queue_dir(), layout.work_dir(), layout.parts_dir(), layout.log_dir()] {
            assert!(d.is_dir());
        }
    }

    #[test]
    fn test_fifo_by_mtime() {
        let (_dir, q) = queue();
        // Enqueued in reverse name order, mtimes say 0 is oldest
        for i in (0..5u64).rev() {
            let path = q.enqueue(&job_name(i), "#!/bin/sh\n").unwrap();
            touch_at(&path, i as i64);
        }

        let mut order = Vec::new();
        while let Some(job) = q.dequeue().unwrap() {
            assert!(job.path.starts_with(q.layout().work_dir()));
            order.push(job.name);
        }
        let expected: Vec<String> = (0..5).map(job_name).collect();
        assert_eq!(order, expected);
        assert_eq!(q.claimed().unwrap().len(), 5);
    }

    #[test]
    fn test_equal_mtime_falls_back_to_name() {
        let (_dir, q) = queue();
        for name in ["job-b", "job-a"] {
            let path = q.enqueue(name, "").unwrap();
            touch_at(&path, 0);
        }
        assert_eq!(q.pending().unwrap(), vec!["job-a", "job-b"]);
    }

    #[test]
    fn test_flags_excluded_from_jobs() {
        let (_dir, q) = queue();
        q.set_flag(Flag::CrawlFinished).unwrap();
        q.set_flag(Flag::StopRequested).unwrap();
        assert!(q.pending().unwrap().is_empty());
        assert!(q.dequeue().unwrap().is_none());
    }

    #[test]
    fn test_state_precedence() {
        let (_dir, q) = queue();
        assert_eq!(q.state(), QueueState::Pending);
        q.set_flag(Flag::CrawlFinished).unwrap();
        assert_eq!(q.state(), QueueState::CrawlDone);
        q.set_flag(Flag::StopRequested).unwrap();
        assert_eq!(q.state(), QueueState::StopRequested);
        q.set_flag(Flag::ConsumerFinished).unwrap();
        assert_eq!(q.state(), QueueState::ConsumerDone);
        q.clear_flag(Flag::ConsumerFinished).unwrap();
        q.clear_flag(Flag::ConsumerFinished).unwrap();
        assert_eq!(q.state(), QueueState::StopRequested);
    }

    #[test]
    fn test_resume_requeues_most_recent() {
        let (_dir, q) = queue();
        for i in 0..6u64 {
            let path = q.enqueue(&job_name(i), "").unwrap();
            touch_at(&path, i as i64);
        }
        for _ in 0..5 {
            q.dequeue().unwrap().unwrap();
        }
        q.set_flag(Flag::CrawlFinished).unwrap();
        q.set_flag(Flag::StopRequested).unwrap();

        let requeued = q.prepare_resume(3).unwrap();
        assert_eq!(requeued, vec![job_name(2), job_name(3), job_name(4)]);
        assert_eq!(
            q.claimed().unwrap(),
            vec![job_name(0), job_name(1)]
        );
        // Requeued jobs run before the job that was never claimed
        assert_eq!(
            q.pending().unwrap(),
            vec![job_name(2), job_name(3), job_name(4), job_name(5)]
        );
        assert!(!q.has_flag(Flag::StopRequested));
    }

    #[test]
    fn test_resume_preconditions() {
        let (_dir, q) = queue();
        let path = q.enqueue(&job_name(0), "").unwrap();
        touch_at(&path, 0);
        q.dequeue().unwrap();

        assert!(matches!(
            q.prepare_resume(3),
            Err(QueueError::NotResumable { .. })
        ));
        // No side effect on failure
        assert_eq!(q.claimed().unwrap(), vec![job_name(0)]);

        q.set_flag(Flag::CrawlFinished).unwrap();
        q.set_flag(Flag::ConsumerFinished).unwrap();
        assert!(matches!(
            q.prepare_resume(3),
            Err(QueueError::NotResumable { .. })
        ));

        let missing = JobQueue::new(RunLayout::at("/nonexistent/partsync-run"));
        assert!(matches!(
            missing.prepare_resume(1),
            Err(QueueError::NotResumable { .. })
        ));
    }
}
