//! Job enqueueing hook
//!
//! In live mode every closed partition becomes a job as soon as its
//! listing is on disk, so copying starts while the crawl is still running.

use crate::error::{HookError, HookResult};
use crate::hook::{HookContext, PartitionHook};
use crate::queue::{job_name, JobQueue, JobTemplate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Post-close hook that enqueues a copy job per partition
#[derive(Debug, Clone)]
pub struct QueueHook {
    queue: JobQueue,
    template: JobTemplate,
    enqueued: Arc<AtomicU64>,
}

impl QueueHook {
    /// Enqueue jobs rendered from `template` into `queue`
    pub fn new(queue: JobQueue, template: JobTemplate) -> Self {
        Self {
            queue,
            template,
            enqueued: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of enqueued jobs, shared with the caller
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.enqueued)
    }
}

impl PartitionHook for QueueHook {
    fn describe(&self) -> String {
        format!("enqueue into '{}'", self.queue.layout().queue_dir().display())
    }

    fn post_close(&mut self, ctx: &HookContext<'_>) -> HookResult<()> {
        let listing = ctx.listing.ok_or_else(|| HookError::Enqueue {
            index: ctx.index,
            reason: "partition has no listing file".into(),
        })?;

        if ctx.entry_count == 0 {
            debug!(partition = ctx.index, "Empty partition, no job");
            return Ok(());
        }

        let name = job_name(self.enqueued.load(Ordering::SeqCst));
        let script = self.template.render(&name, listing);
        self.queue
            .enqueue(&name, &script)
            .map_err(|e| HookError::Enqueue {
                index: ctx.index,
                reason: e.to_string(),
            })?;
        self.enqueued.fetch_add(1, Ordering::SeqCst);

        debug!(partition = ctx.index, job = %name, "Job enqueued");
        Ok(())
    }
}
