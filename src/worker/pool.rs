//! Dispatch loop
//!
//! A single control loop owns the roster of running jobs. Each iteration it
//! reacts to interrupts, reaps finished jobs, fills free slots from the
//! queue and decides whether the pass is over. Nothing blocks except the
//! sleep between iterations, so a producer thread can keep enqueueing while
//! the loop runs.

use crate::error::Result;
use crate::queue::{ClaimedJob, Flag, JobQueue, QueueState};
use crate::worker::executor::{Executor, JobHandle, JobStatus};
use crate::worker::interrupt::{Interrupt, InterruptState};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default delay between loop iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Snapshot handed to the progress callback every iteration
#[derive(Debug, Clone)]
pub struct DispatchProgress {
    /// Jobs currently running
    pub running: usize,
    /// Jobs started so far
    pub started: u64,
    /// Jobs reaped so far
    pub completed: u64,
    /// Jobs waiting in the queue
    pub pending: usize,
    /// Queue state at the start of the iteration
    pub state: QueueState,
    /// Interrupt state
    pub interrupt: InterruptState,
    /// Time since the loop started
    pub elapsed: Duration,
}

/// Result of a dispatch pass
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Jobs started
    pub started: u64,
    /// Jobs that ran until their process exited
    pub completed: u64,
    /// Jobs that could not be started
    pub spawn_failures: u64,
    /// Jobs killed on a second interrupt
    pub killed: u64,
    /// The pass ended on a stop request
    pub stopped: bool,
    /// The pass ran every job and wrote the consumer-finished flag
    pub consumer_finished: bool,
    /// Duration of the pass
    pub duration: Duration,
}

struct RunningJob {
    job: ClaimedJob,
    slot: usize,
    handle: Box<dyn JobHandle>,
}

/// Runs queued jobs on a fixed set of worker slots
pub struct DispatchLoop<'a> {
    queue: &'a JobQueue,
    slots: Vec<Arc<dyn Executor>>,
    poll_interval: Duration,
    interrupt: Interrupt,
}

impl<'a> DispatchLoop<'a> {
    /// Loop over `queue` with one slot per executor
    pub fn new(queue: &'a JobQueue, slots: Vec<Arc<dyn Executor>>, interrupt: Interrupt) -> Self {
        Self {
            queue,
            slots,
            poll_interval: DEFAULT_POLL_INTERVAL,
            interrupt,
        }
    }

    /// Set the delay between iterations
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of worker slots
    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    /// Record a startup failure where the post-run audit will find it
    fn record_spawn_failure(&self, job: &ClaimedJob, reason: &str) {
        let path = self
            .queue
            .layout()
            .log_dir()
            .join(format!("{}.stderr", job.name));
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "partsync: {}", reason));
        if let Err(e) = written {
            warn!(job = %job.name, path = %path.display(), error = %e, "Cannot record spawn failure");
        }
    }

    /// Run until the queue is drained or a stop is requested
    pub fn run<F>(&self, mut on_tick: F) -> Result<DispatchOutcome>
    where
        F: FnMut(&DispatchProgress),
    {
        let start = Instant::now();
        let mut outcome = DispatchOutcome::default();
        let mut free: VecDeque<usize> = (0..self.slots.len()).collect();
        let mut roster: Vec<RunningJob> = Vec::with_capacity(self.slots.len());
        let mut stop_written = false;
        let mut kill_sent = false;

        info!(workers = self.slots.len(), "Dispatch loop started");

        loop {
            let interrupt = self.interrupt.state();

            if interrupt >= InterruptState::Draining && !stop_written {
                self.queue.set_flag(Flag::StopRequested)?;
                stop_written = true;
                info!(running = roster.len(), "Stop requested, waiting for running jobs");
            }

            if interrupt == InterruptState::Killing && !kill_sent {
                kill_sent = true;
                for running in roster.iter_mut() {
                    match running.handle.kill() {
                        Ok(()) => {
                            outcome.killed += 1;
                            debug!(job = %running.job.name, "Killed");
                        }
                        Err(e) => warn!(job = %running.job.name, error = %e, "Cannot kill job"),
                    }
                }
                warn!(killed = outcome.killed, "Killed running jobs");
            }

            // Reap
            roster.retain_mut(|running| match running.handle.poll() {
                Ok(JobStatus::Running) => true,
                Ok(JobStatus::Exited(code)) => {
                    debug!(job = %running.job.name, slot = running.slot, code = ?code, "Job finished");
                    outcome.completed += 1;
                    free.push_back(running.slot);
                    false
                }
                Err(e) => {
                    warn!(job = %running.job.name, error = %e, "Cannot poll job, dropping it");
                    free.push_back(running.slot);
                    false
                }
            });

            let state = self.queue.state();
            let stopping =
                self.queue.has_flag(Flag::StopRequested) || interrupt != InterruptState::Running;

            // Fill
            if !stopping {
                while let Some(&slot) = free.front() {
                    let Some(job) = self.queue.dequeue()? else {
                        break;
                    };
                    free.pop_front();
                    match self.slots[slot].spawn(&job) {
                        Ok(handle) => {
                            outcome.started += 1;
                            roster.push(RunningJob { job, slot, handle });
                        }
                        Err(e) => {
                            warn!(job = %job.name, error = %e, "Cannot start job");
                            self.record_spawn_failure(&job, &e.to_string());
                            outcome.spawn_failures += 1;
                            free.push_back(slot);
                        }
                    }
                }
            }

            let pending = self.queue.pending()?.len();

            if stopping && roster.is_empty() {
                outcome.stopped = true;
                break;
            }
            if state == QueueState::CrawlDone && pending == 0 && roster.is_empty() {
                self.queue.set_flag(Flag::ConsumerFinished)?;
                outcome.consumer_finished = true;
                break;
            }

            on_tick(&DispatchProgress {
                running: roster.len(),
                started: outcome.started,
                completed: outcome.completed,
                pending,
                state,
                interrupt,
                elapsed: start.elapsed(),
            });

            thread::sleep(self.poll_interval);
        }

        outcome.duration = start.elapsed();
        info!(
            started = outcome.started,
            completed = outcome.completed,
            failed_to_start = outcome.spawn_failures,
            stopped = outcome.stopped,
            duration_secs = outcome.duration.as_secs(),
            "Dispatch loop finished"
        );
        Ok(outcome)
    }
}
