//! Hook protocol
//!
//! Dispatchers report partition boundaries to a [`PartitionSink`]. The
//! standard sink, [`HookChain`], writes the partition listing when a
//! partition closes and then runs every configured [`PartitionHook`].
//!
//! ```text
//!  dispatcher ──opened──▶ HookChain ──pre_open──▶ hooks
//!  dispatcher ──closed──▶ HookChain ──write listing──▶ post_close──▶ hooks
//! ```
//!
//! Hook failures are logged and counted. They never stop a dispatch pass:
//! partitioning and consumption are decoupled, so a hook that fails for
//! one partition must not hold back the rest of the crawl.

mod command;
mod enqueue;

pub use command::CommandHook;
pub use enqueue::QueueHook;

use crate::entry::EntryStore;
use crate::error::HookResult;
use crate::partition::output::ListingWriter;
use crate::partition::Partition;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which boundary a hook is being invoked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// A partition is about to start accumulating entries
    PreOpen,
    /// A partition has closed and its listing is complete
    PostClose,
}

impl HookKind {
    /// Stable name, also exported to command hooks
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::PreOpen => "pre-open",
            HookKind::PostClose => "post-close",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition details handed to a hook
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Boundary being reported
    pub kind: HookKind,
    /// Partition ordinal
    pub index: u32,
    /// Listing file of the partition, if listings go to files
    pub listing: Option<&'a Path>,
    /// Entry count (final for post-close)
    pub entry_count: u64,
    /// Total size, preload included (final for post-close)
    pub total_size: u64,
}

impl<'a> HookContext<'a> {
    /// Build a context from a partition
    pub fn new(kind: HookKind, partition: &Partition, listing: Option<&'a Path>) -> Self {
        Self {
            kind,
            index: partition.index,
            listing,
            entry_count: partition.entry_count,
            total_size: partition.total_size,
        }
    }
}

/// Extension point invoked at partition boundaries
pub trait PartitionHook: Send {
    /// Short description used in log messages
    fn describe(&self) -> String;

    /// Called when a partition opens
    fn pre_open(&mut self, _ctx: &HookContext<'_>) -> HookResult<()> {
        Ok(())
    }

    /// Called once a partition has closed and its listing is written
    fn post_close(&mut self, _ctx: &HookContext<'_>) -> HookResult<()> {
        Ok(())
    }
}

/// Receiver of partition boundaries, driven by the dispatchers
pub trait PartitionSink {
    /// A partition was opened
    fn opened(&mut self, partition: &Partition);

    /// A partition was closed; `entries` still holds its members
    fn closed(&mut self, partition: &Partition, entries: &EntryStore);
}

/// Sink that ignores every boundary
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PartitionSink for NullSink {
    fn opened(&mut self, _partition: &Partition) {}
    fn closed(&mut self, _partition: &Partition, _entries: &EntryStore) {}
}

/// Listing writer followed by an ordered list of hooks
#[derive(Default)]
pub struct HookChain {
    listing: Option<ListingWriter>,
    hooks: Vec<Box<dyn PartitionHook>>,
    failures: u64,
    listings_written: u64,
}

impl HookChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Write each partition's listing before post-close hooks run
    pub fn with_listing(mut self, writer: ListingWriter) -> Self {
        self.listing = Some(writer);
        self
    }

    /// Append a hook
    pub fn with_hook(mut self, hook: Box<dyn PartitionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Number of hook or listing failures so far
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Number of listings written so far
    pub fn listings_written(&self) -> u64 {
        self.listings_written
    }

    fn listing_path(&self, index: u32) -> Option<PathBuf> {
        self.listing.as_ref().and_then(|w| w.listing_path(index))
    }
}

impl PartitionSink for HookChain {
    fn opened(&mut self, partition: &Partition) {
        let listing = self.listing_path(partition.index);
        let ctx = HookContext::new(HookKind::PreOpen, partition, listing.as_deref());

        for hook in &mut self.hooks {
            if let Err(e) = hook.pre_open(&ctx) {
                warn!(partition = partition.index, hook = %hook.describe(), "{}", e);
                self.failures += 1;
            }
        }
    }

    fn closed(&mut self, partition: &Partition, entries: &EntryStore) {
        let listing = match &self.listing {
            Some(writer) => match writer.write(partition, entries) {
                Ok(path) => {
                    self.listings_written += 1;
                    path
                }
                Err(e) => {
                    warn!(partition = partition.index, "{}", e);
                    self.failures += 1;
                    None
                }
            },
            None => None,
        };

        debug!(
            partition = partition.index,
            entries = partition.entry_count,
            size = partition.total_size,
            "Partition closed"
        );

        let ctx = HookContext::new(HookKind::PostClose, partition, listing.as_deref());
        for hook in &mut self.hooks {
            if let Err(e) = hook.post_close(&ctx) {
                warn!(partition = partition.index, hook = %hook.describe(), "{}", e);
                self.failures += 1;
            }
        }
    }
}
