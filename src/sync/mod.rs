//! Sync orchestration
//!
//! A sync run has two halves working on the same run directory:
//!
//! ```text
//!   producer thread                      main thread
//!   ───────────────                      ───────────
//!   crawl source ─▶ limit dispatcher     DispatchLoop
//!        │                                   ▲
//!        ▼ partition closed                  │ dequeue
//!   parts/part.N ─▶ queue/job-N ─────────────┘
//!        │
//!        ▼ end of crawl
//!   queue/.crawl-finished
//! ```
//!
//! They only talk through the queue directory and its flags. After the
//! dispatch loop returns, every non-empty `log/<job>.stderr` is reported as
//! a failed job.

pub mod status;

use crate::config::SyncConfig;
use crate::entry::SizeTransform;
use crate::error::{JobFailure, PartError, QueueError, Result};
use crate::hook::{HookChain, QueueHook};
use crate::input::InputArguments;
use crate::partition::{ListingTarget, ListingWriter, PartitionMode, PartitionReport, PartitionRunner};
use crate::queue::{Flag, JobQueue, JobTemplate, RunMetadata};
use crate::worker::{
    check_tool, slot_executors, DispatchLoop, DispatchOutcome, DispatchProgress, Interrupt,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Progress of a running sync, handed to the caller every loop iteration
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Dispatch loop snapshot
    pub dispatch: DispatchProgress,
    /// Jobs enqueued by the producer in this pass
    pub enqueued: u64,
    /// The producer has finished the crawl
    pub crawl_finished: bool,
    /// Worker slots
    pub workers: usize,
}

/// Result of a sync run
#[derive(Debug)]
pub struct SyncReport {
    /// Run name
    pub run: String,
    /// Run directory
    pub run_dir: PathBuf,
    /// This pass resumed an earlier run
    pub resumed: bool,
    /// Jobs moved back to pending on resume
    pub requeued: Vec<String>,
    /// Crawl and partitioning report; `None` on resume
    pub partition: Option<PartitionReport>,
    /// Jobs enqueued in this pass
    pub jobs_enqueued: u64,
    /// Listing or enqueue failures
    pub hook_failures: u64,
    /// Dispatch loop result
    pub dispatch: DispatchOutcome,
    /// Jobs with non-empty error output
    pub failures: Vec<JobFailure>,
    /// The crawl-finished flag was present at the end
    pub crawl_finished: bool,
    /// Wall time of the pass
    pub duration: Duration,
}

impl SyncReport {
    /// Every job ran and none reported errors
    pub fn is_clean(&self) -> bool {
        self.dispatch.consumer_finished && self.failures.is_empty() && self.hook_failures == 0
    }

    /// Whether `sync -r` can pick this run up again
    pub fn resumable(&self) -> bool {
        self.crawl_finished && !self.dispatch.consumer_finished
    }
}

/// Every job whose `<job>.stderr` artifact is non-empty, by job name
pub fn audit_failures(log_dir: &Path) -> io::Result<Vec<JobFailure>> {
    let mut failures = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(job) = name.strip_suffix(".stderr") else {
            continue;
        };
        let bytes = entry.metadata()?.len();
        if bytes > 0 {
            failures.push(JobFailure {
                job: job.to_string(),
                bytes,
                path: entry.path(),
            });
        }
    }
    failures.sort_by(|a, b| a.job.cmp(&b.job));
    Ok(failures)
}

type ProducerHandle = JoinHandle<Result<(PartitionReport, u64)>>;

/// A prepared sync run
pub struct SyncRun {
    config: SyncConfig,
    queue: JobQueue,
    requeued: Vec<String>,
    interrupt: Interrupt,
    shutdown: Arc<AtomicBool>,
}

impl SyncRun {
    /// Create (or reopen, on resume) the run directory
    ///
    /// Every precondition is checked before anything on disk changes: the
    /// copy tool must be reachable, a resumed run must have finished its
    /// crawl and not its jobs.
    pub fn prepare(
        mut config: SyncConfig,
        interrupt: Interrupt,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let layout = config.layout();

        let (queue, requeued) = if config.resume {
            if !layout.exists() {
                return Err(QueueError::NotResumable {
                    run: config.run.clone(),
                    reason: format!("'{}' does not exist", layout.root().display()),
                }
                .into());
            }
            let meta = RunMetadata::load(layout.root())?;
            config.apply_metadata(&meta);
            check_tool(config.tool.program(), &config.remote_targets)?;

            let queue = JobQueue::new(layout);
            let requeued = queue.prepare_resume(meta.workers)?;
            if config.workers != meta.workers {
                // The next resume window follows this pass's worker count
                RunMetadata {
                    workers: config.workers,
                    ..meta
                }
                .save(queue.layout().root())?;
            }
            (queue, requeued)
        } else {
            if layout.exists() {
                return Err(QueueError::Directory {
                    path: layout.root().to_path_buf(),
                    reason: "run already exists".into(),
                }
                .into());
            }
            check_tool(config.tool.program(), &config.remote_targets)?;
            let queue = JobQueue::create(layout)?;
            config.to_metadata().save(queue.layout().root())?;
            (queue, Vec::new())
        };

        info!(
            run = %config.run,
            dir = %queue.layout().root().display(),
            resume = config.resume,
            "Run prepared"
        );

        Ok(Self {
            config,
            queue,
            requeued,
            interrupt,
            shutdown,
        })
    }

    /// Effective configuration (metadata applied on resume)
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run queue
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    fn job_template(&self) -> JobTemplate {
        JobTemplate {
            tool: self.config.tool,
            options: self.config.tool_options.clone(),
            source: self.config.source.clone(),
            destination: self.config.destination.clone(),
            log_dir: self.queue.layout().log_dir(),
        }
    }

    /// Start the crawl on its own thread, enqueueing a job per partition
    fn spawn_producer(&self) -> Result<(ProducerHandle, Arc<AtomicU64>)> {
        let queue = self.queue.clone();
        let hook = QueueHook::new(queue.clone(), self.job_template());
        let enqueued = hook.counter();
        let listing = ListingWriter::new(ListingTarget::Template(
            self.queue.layout().parts_dir().join("part"),
        ));
        let runner = PartitionRunner::new(
            PartitionMode::Limits(self.config.limits),
            SizeTransform::IDENTITY,
            self.config.crawl.clone(),
        )
        .live(true)
        .with_shutdown(Arc::clone(&self.shutdown));
        let source = self.config.source.to_string_lossy().into_owned();

        let handle = thread::Builder::new()
            .name("producer".into())
            .spawn(move || -> Result<(PartitionReport, u64)> {
                let mut chain = HookChain::new().with_listing(listing).with_hook(Box::new(hook));
                let result = runner.run(InputArguments::from_reader(None, vec![source]), &mut chain);

                match &result {
                    Ok(report) if !report.interrupted => {
                        queue.set_flag(Flag::CrawlFinished)?;
                        info!(
                            entries = report.entries_found,
                            partitions = report.partitions.len(),
                            "Crawl finished"
                        );
                    }
                    // No crawl-finished flag: the consumer must not wait forever
                    _ => queue.set_flag(Flag::StopRequested)?,
                }
                result.map(|report| (report, chain.failures()))
            })?;

        Ok((handle, enqueued))
    }

    /// Run the pass to completion, calling `on_tick` every loop iteration
    pub fn run<F>(self, mut on_tick: F) -> Result<SyncReport>
    where
        F: FnMut(&SyncProgress),
    {
        let start = Instant::now();
        let layout = self.queue.layout().clone();

        let (producer, enqueued) = if self.config.resume {
            (None, Arc::new(AtomicU64::new(0)))
        } else {
            let (handle, enqueued) = self.spawn_producer()?;
            (Some(handle), enqueued)
        };

        let slots = slot_executors(
            self.config.workers,
            &self.config.remote_targets,
            &layout.log_dir(),
        );
        let workers = slots.len();
        let dispatch = DispatchLoop::new(&self.queue, slots, self.interrupt.clone())
            .poll_interval(self.config.poll_interval)
            .run(|progress| {
                on_tick(&SyncProgress {
                    dispatch: progress.clone(),
                    enqueued: enqueued.load(Ordering::Relaxed),
                    crawl_finished: self.queue.has_flag(Flag::CrawlFinished),
                    workers,
                })
            });

        // Whatever ended the loop, the crawl has nothing left to feed
        if dispatch.as_ref().map_or(true, |d| d.stopped) {
            self.shutdown.store(true, Ordering::SeqCst);
        }

        let produced = match producer {
            Some(handle) => Some(handle.join().map_err(|_| {
                PartError::Io(io::Error::other("producer thread panicked"))
            })??),
            None => None,
        };
        let dispatch = dispatch?;
        let (partition, hook_failures) = match produced {
            Some((report, failures)) => (Some(report), failures),
            None => (None, 0),
        };

        let failures = audit_failures(&layout.log_dir())?;
        for failure in &failures {
            warn!("{}", failure);
        }

        Ok(SyncReport {
            run: self.config.run.clone(),
            run_dir: layout.root().to_path_buf(),
            resumed: self.config.resume,
            requeued: self.requeued,
            partition,
            jobs_enqueued: enqueued.load(Ordering::SeqCst),
            hook_failures,
            dispatch,
            failures,
            crawl_finished: self.queue.has_flag(Flag::CrawlFinished),
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_audit_failures() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("job-00000002.stderr"), "rsync: error\n").unwrap();
        fs::write(dir.path().join("job-00000001.stderr"), "x").unwrap();
        fs::write(dir.path().join("job-00000003.stderr"), "").unwrap();
        fs::write(dir.path().join("job-00000002.stdout"), "lots of output").unwrap();

        let failures = audit_failures(dir.path()).unwrap();
        let jobs: Vec<&str> = failures.iter().map(|f| f.job.as_str()).collect();
        assert_eq!(jobs, vec!["job-00000001", "job-00000002"]);
        assert_eq!(failures[1].bytes, 13);
    }

    #[test]
    fn test_report_flags() {
        let mut report = SyncReport {
            run: "r".into(),
            run_dir: PathBuf::from("/w/r"),
            resumed: false,
            requeued: vec![],
            partition: None,
            jobs_enqueued: 0,
            hook_failures: 0,
            dispatch: DispatchOutcome {
                consumer_finished: true,
                ..Default::default()
            },
            failures: vec![],
            crawl_finished: true,
            duration: Duration::ZERO,
        };
        assert!(report.is_clean());
        assert!(!report.resumable());

        report.dispatch.consumer_finished = false;
        report.dispatch.stopped = true;
        assert!(!report.is_clean());
        assert!(report.resumable());

        report.crawl_finished = false;
        assert!(!report.resumable());
    }
}
