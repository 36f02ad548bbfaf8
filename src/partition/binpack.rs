//! Fixed partition count dispatcher
//!
//! Greedy longest-processing-time bin packing: entries are sorted by
//! effective size, largest first, and each one goes to the partition that
//! currently holds the least. The spread between the fullest and the
//! emptiest partition is then bounded by the largest single entry.
//!
//! Zero-size entries (directories, empty files) give no signal to the size
//! heuristic, so they are dealt out round-robin afterwards, in traversal
//! order, to keep entry counts balanced.
//!
//! All entries must be known up front, so this mode cannot stream.

use crate::entry::{EntryId, EntryStore};
use crate::error::{DispatchError, EntryError, Result};
use crate::hook::PartitionSink;
use crate::partition::PartitionStore;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// Dispatcher producing exactly `count` partitions
#[derive(Debug, Clone, Copy)]
pub struct BinPacker {
    count: u32,
    preload: u64,
}

impl BinPacker {
    /// Create a dispatcher for `count` partitions
    pub fn new(count: i64) -> std::result::Result<Self, DispatchError> {
        if count <= 0 {
            return Err(DispatchError::InvalidPartitionCount(count));
        }
        let count = u32::try_from(count).map_err(|_| DispatchError::IndexOverflow)?;
        Ok(Self { count, preload: 0 })
    }

    /// Give every partition a preload baseline
    pub fn preload(mut self, preload: u64) -> Self {
        self.preload = preload;
        self
    }

    /// Number of partitions produced
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Dispatch every entry held by `entries`
    ///
    /// All partitions are opened first; they are closed, in index order,
    /// once every entry has been assigned.
    pub fn dispatch(
        &self,
        entries: &EntryStore,
        sink: &mut dyn PartitionSink,
    ) -> Result<PartitionStore> {
        // Snapshot ids of entries carrying a size
        let mut sized: Vec<EntryId> = Vec::new();
        sized
            .try_reserve_exact(entries.len())
            .map_err(|_| EntryError::Allocation {
                what: "sort array",
                requested: entries.len(),
            })?;
        sized.extend(
            entries
                .iter()
                .filter(|(_, e)| e.effective_size > 0)
                .map(|(id, _)| id),
        );

        // Largest first; the sort is stable so equal sizes keep traversal order
        sized.sort_by_key(|id| {
            Reverse(entries.get(*id).map(|e| e.effective_size).unwrap_or(0))
        });

        let mut parts = PartitionStore::new();
        let mut heap = BinaryHeap::with_capacity(self.count as usize);
        for _ in 0..self.count {
            let index = parts.open(self.preload)?;
            if let Some(part) = parts.get(index) {
                sink.opened(part);
            }
            heap.push(Reverse((self.preload, index)));
        }

        for id in &sized {
            let size = entries
                .get(*id)
                .map(|e| e.effective_size)
                .ok_or(DispatchError::UnknownEntry(id.0))?;
            let Some(Reverse((total, index))) = heap.pop() else {
                break;
            };
            parts.assign(index, *id, size)?;
            heap.push(Reverse((total.saturating_add(size), index)));
        }

        // Round-robin over zero-size entries, in traversal order
        let mut next = 0u32;
        let mut zero_count = 0u64;
        for (id, _) in entries.iter().filter(|(_, e)| e.effective_size == 0) {
            parts.assign(next, id, 0)?;
            next = (next + 1) % self.count;
            zero_count += 1;
        }

        debug!(
            partitions = self.count,
            sized = sized.len(),
            zero_size = zero_count,
            "Bin packing complete"
        );

        for index in 0..self.count {
            let part = parts.close(index)?;
            sink.closed(part, entries);
        }

        Ok(parts)
    }
}
