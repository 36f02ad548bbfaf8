//! Partitioning pipeline
//!
//! Wires the crawler thread to one of the two dispatchers:
//! - fixed count: the whole crawl is collected first, then bin packed
//! - limits: entries are dispatched as they arrive; in live mode they are
//!   released as soon as their partition closes

use crate::crawl::{spawn_crawler, CrawlOptions, CrawlStats, Crawler};
use crate::entry::{EntryStore, SizeTransform};
use crate::error::Result;
use crate::hook::PartitionSink;
use crate::input::InputArguments;
use crate::partition::{BinPacker, LimitDispatcher, Limits, PartitionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How entries are grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Exactly this many partitions
    Count(u32),
    /// As many partitions as the limits require
    Limits(Limits),
}

/// Result of a partitioning pass
#[derive(Debug)]
pub struct PartitionReport {
    /// Entries found by the crawl
    pub entries_found: u64,
    /// Sum of raw entry sizes
    pub raw_size: u64,
    /// Partitions, in index order
    pub partitions: PartitionStore,
    /// Crawl counters
    pub crawl: CrawlStats,
    /// Stopped early on shutdown
    pub interrupted: bool,
    /// Wall time of the pass
    pub duration: Duration,
}

impl PartitionReport {
    /// Sum of effective entry sizes, preload excluded
    pub fn effective_size(&self) -> u64 {
        self.partitions
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.entries_size()))
    }
}

/// Runs input arguments through the crawler and a dispatcher
#[derive(Debug, Clone)]
pub struct PartitionRunner {
    mode: PartitionMode,
    transform: SizeTransform,
    crawl: CrawlOptions,
    live: bool,
    shutdown: Arc<AtomicBool>,
}

impl PartitionRunner {
    /// Create a runner
    pub fn new(mode: PartitionMode, transform: SizeTransform, crawl: CrawlOptions) -> Self {
        Self {
            mode,
            transform,
            crawl,
            live: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Release entries once their partition is closed
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Share a shutdown flag with the caller
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Flag that stops the pass when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the pass, reporting partition boundaries to `sink`
    pub fn run(&self, input: InputArguments, sink: &mut dyn PartitionSink) -> Result<PartitionReport> {
        let start = Instant::now();
        let crawler = spawn_crawler(input, self.crawl.clone(), Arc::clone(&self.shutdown))?;
        let mut entries = EntryStore::new(self.transform);

        info!(mode = ?self.mode, live = self.live, "Partitioning");

        let outcome = match self.mode {
            PartitionMode::Count(_) => self
                .collect(&crawler, &mut entries)
                .map(|()| (entries.total_raw_size(), None)),
            PartitionMode::Limits(limits) => self
                .stream(&crawler, &mut entries, limits, sink)
                .map(|(raw, parts)| (raw, Some(parts))),
        };
        let crawl = crawler.join();
        let (raw_size, streamed) = outcome?;
        let interrupted = crawl.interrupted || self.shutdown.load(Ordering::Relaxed);

        let partitions = match (streamed, self.mode) {
            (Some(parts), _) => parts,
            // Empty input builds no partitions, not N empty ones
            (None, PartitionMode::Count(count)) if !interrupted && !entries.is_empty() => {
                BinPacker::new(i64::from(count))?
                    .preload(self.transform.partition_baseline())
                    .dispatch(&entries, sink)?
            }
            (None, _) => PartitionStore::new(),
        };

        let report = PartitionReport {
            entries_found: entries.total_added(),
            raw_size,
            partitions,
            crawl,
            interrupted,
            duration: start.elapsed(),
        };
        debug!(
            entries = report.entries_found,
            partitions = report.partitions.len(),
            "Partitioning finished"
        );
        Ok(report)
    }

    /// Collect every crawled entry
    fn collect(&self, crawler: &Crawler, entries: &mut EntryStore) -> Result<()> {
        for crawled in crawler.receiver().iter() {
            entries.add(crawled.path, crawled.size, crawled.is_directory)?;
        }
        Ok(())
    }

    /// Dispatch entries as they arrive
    fn stream(
        &self,
        crawler: &Crawler,
        entries: &mut EntryStore,
        limits: Limits,
        sink: &mut dyn PartitionSink,
    ) -> Result<(u64, PartitionStore)> {
        let mut dispatcher = LimitDispatcher::new(limits, &self.transform)?;
        if self.live {
            dispatcher = dispatcher.releasing();
        }

        let mut raw = 0u64;
        for crawled in crawler.receiver().iter() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            raw = raw.saturating_add(crawled.size);
            let id = entries.add(crawled.path, crawled.size, crawled.is_directory)?;
            dispatcher.dispatch(entries, id, sink)?;
        }

        if self.shutdown.load(Ordering::Relaxed) {
            return Ok((raw, dispatcher.abandon()));
        }
        Ok((raw, dispatcher.finish(entries, sink)?))
    }
}
