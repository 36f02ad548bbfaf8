//! Limit-driven dispatcher
//!
//! Entries are taken one at a time, in traversal order, and appended to the
//! open partition until the next one would push it past the entry-count or
//! size limit. The partition is then closed and a new one opened. Because
//! nothing ever looks ahead, this works on an unbounded stream and is the
//! dispatcher behind live mode.
//!
//! ```text
//!          fits                       would exceed
//!   OPEN ────────▶ OPEN        OPEN ──────────────▶ CLOSE, OPEN(new)
//! ```
//!
//! An entry that is larger than the size limit on its own is isolated in a
//! partition of its own rather than rejected.

use crate::entry::{EntryId, EntryStore, SizeTransform};
use crate::error::DispatchError;
use crate::hook::PartitionSink;
use crate::partition::PartitionStore;

/// Per-partition limits; `None` means the limit is not checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    /// Maximum number of entries per partition
    pub max_entries: Option<u64>,
    /// Maximum total size per partition, preload included
    pub max_size: Option<u64>,
}

impl Limits {
    /// Validate that at least one limit is set and none is zero
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_entries.is_none() && self.max_size.is_none() {
            return Err(DispatchError::NoLimits);
        }
        if self.max_entries == Some(0) {
            return Err(DispatchError::ZeroLimit { what: "file count" });
        }
        if self.max_size == Some(0) {
            return Err(DispatchError::ZeroLimit { what: "size" });
        }
        Ok(())
    }
}

/// Streaming dispatcher closing partitions on limits
#[derive(Debug)]
pub struct LimitDispatcher {
    limits: Limits,
    preload: u64,
    parts: PartitionStore,
    current: Option<u32>,
    release: bool,
    dispatched: u64,
}

impl LimitDispatcher {
    /// Create a dispatcher; fails before any entry is seen if no limit is set
    pub fn new(limits: Limits, transform: &SizeTransform) -> Result<Self, DispatchError> {
        limits.validate()?;
        Ok(Self {
            limits,
            preload: transform.partition_baseline(),
            parts: PartitionStore::new(),
            current: None,
            release: false,
            dispatched: 0,
        })
    }

    /// Release entries and member ids once their partition is closed
    ///
    /// Used in live mode, where the listing is the only copy needed after
    /// close and the crawl may be far larger than memory.
    pub fn releasing(mut self) -> Self {
        self.release = true;
        self
    }

    /// The configured limits
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Partitions opened so far
    pub fn partitions(&self) -> &PartitionStore {
        &self.parts
    }

    /// Number of entries dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Whether `size` alone exceeds the size limit of an empty partition
    fn oversized(&self, size: u64) -> bool {
        self.limits
            .max_size
            .is_some_and(|max| self.preload.saturating_add(size) > max)
    }

    /// Whether `size` can join partition `index` without breaking a limit
    fn fits(&self, index: u32, size: u64) -> bool {
        let Some(part) = self.parts.get(index) else {
            return false;
        };
        if let Some(max) = self.limits.max_entries {
            if part.entry_count + 1 > max {
                return false;
            }
        }
        if let Some(max) = self.limits.max_size {
            if part.size_with(size) > max {
                return false;
            }
        }
        true
    }

    fn open(&mut self, sink: &mut dyn PartitionSink) -> Result<u32, DispatchError> {
        let index = self.parts.open(self.preload)?;
        if let Some(part) = self.parts.get(index) {
            sink.opened(part);
        }
        self.current = Some(index);
        Ok(index)
    }

    fn close(
        &mut self,
        index: u32,
        entries: &mut EntryStore,
        sink: &mut dyn PartitionSink,
    ) -> Result<(), DispatchError> {
        let part = self.parts.close(index)?;
        sink.closed(part, entries);
        let last = part.members().last().copied();
        self.current = None;

        if self.release {
            if let Some(last) = last {
                entries.release_through(last);
            }
            self.parts.get_mut(index)?.release_members();
        }
        Ok(())
    }

    /// Dispatch one entry held by `entries`
    pub fn dispatch(
        &mut self,
        entries: &mut EntryStore,
        id: EntryId,
        sink: &mut dyn PartitionSink,
    ) -> Result<(), DispatchError> {
        let size = entries
            .get(id)
            .map(|e| e.effective_size)
            .ok_or(DispatchError::UnknownEntry(id.0))?;

        if self.oversized(size) {
            if let Some(current) = self.current {
                self.close(current, entries, sink)?;
            }
            let index = self.open(sink)?;
            self.parts.assign(index, id, size)?;
            self.dispatched += 1;
            return self.close(index, entries, sink);
        }

        let index = match self.current {
            Some(current) if self.fits(current, size) => current,
            Some(current) => {
                self.close(current, entries, sink)?;
                self.open(sink)?
            }
            None => self.open(sink)?,
        };
        self.parts.assign(index, id, size)?;
        self.dispatched += 1;
        Ok(())
    }

    /// Dispatch every entry currently held by `entries`, in order
    pub fn dispatch_all(
        &mut self,
        entries: &mut EntryStore,
        sink: &mut dyn PartitionSink,
    ) -> Result<(), DispatchError> {
        let ids: Vec<EntryId> = entries.ids().collect();
        for id in ids {
            self.dispatch(entries, id, sink)?;
        }
        Ok(())
    }

    /// Stop without closing the trailing partition
    ///
    /// Used when a run is interrupted: the open partition never reaches its
    /// post-close hooks, so no job is built from an incomplete listing.
    pub fn abandon(self) -> PartitionStore {
        self.parts
    }

    /// Close the trailing partition at end of input
    pub fn finish(
        mut self,
        entries: &mut EntryStore,
        sink: &mut dyn PartitionSink,
    ) -> Result<PartitionStore, DispatchError> {
        if let Some(current) = self.current {
            self.close(current, entries, sink)?;
        }
        Ok(self.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::NullSink;

    fn run(sizes: &[u64], limits: Limits) -> PartitionStore {
        let mut store = EntryStore::new(SizeTransform::default());
        for (i, size) in sizes.iter().enumerate() {
            store.add(format!("/f{}", i), *size, false).unwrap();
        }
        let mut d = LimitDispatcher::new(limits, &SizeTransform::default()).unwrap();
        d.dispatch_all(&mut store, &mut NullSink).unwrap();
        d.finish(&mut store, &mut NullSink).unwrap()
    }

    fn members(parts: &PartitionStore) -> Vec<Vec<u64>> {
        parts
            .iter()
            .map(|p| p.members().iter().map(|id| id.0).collect())
            .collect()
    }

    #[test]
    fn test_no_limits_rejected() {
        let err = LimitDispatcher::new(Limits::default(), &SizeTransform::default()).unwrap_err();
        assert_eq!(err, DispatchError::NoLimits);

        let err = LimitDispatcher::new(
            Limits {
                max_entries: Some(0),
                max_size: None,
            },
            &SizeTransform::default(),
        )
        .unwrap_err();
        assert_eq!(err, DispatchError::ZeroLimit { what: "file count" });
    }

    #[test]
    fn test_max_entries_two() {
        let parts = run(
            &[10, 10, 10, 10, 10],
            Limits {
                max_entries: Some(2),
                max_size: None,
            },
        );
        assert_eq!(members(&parts), vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert!(parts.iter().all(|p| p.is_closed()));
    }

    #[test]
    fn test_max_size() {
        let parts = run(
            &[40, 40, 30, 50, 10],
            Limits {
                max_entries: None,
                max_size: Some(100),
            },
        );
        assert_eq!(members(&parts), vec![vec![0, 1], vec![2, 3, 4]]);
        let totals: Vec<u64> = parts.iter().map(|p| p.total_size).collect();
        assert_eq!(totals, vec![80, 90]);
    }

    #[test]
    fn test_oversized_entry_isolated() {
        let parts = run(
            &[10, 500, 10, 10],
            Limits {
                max_entries: None,
                max_size: Some(100),
            },
        );
        assert_eq!(members(&parts), vec![vec![0], vec![1], vec![2, 3]]);
        assert_eq!(parts.get(1).unwrap().total_size, 500);
    }

    #[test]
    fn test_oversized_first_entry() {
        let parts = run(
            &[500, 10],
            Limits {
                max_entries: None,
                max_size: Some(100),
            },
        );
        assert_eq!(members(&parts), vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_preload_counts_towards_size() {
        let transform = SizeTransform::new(50, 0, 1).unwrap();
        let mut store = EntryStore::new(transform);
        for _ in 0..4 {
            store.add("/f", 30, false).unwrap();
        }
        let mut d = LimitDispatcher::new(
            Limits {
                max_entries: None,
                max_size: Some(110),
            },
            &transform,
        )
        .unwrap();
        d.dispatch_all(&mut store, &mut NullSink).unwrap();
        let parts = d.finish(&mut store, &mut NullSink).unwrap();

        assert_eq!(members(&parts), vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(parts.total_preload(), 100);
        assert_eq!(parts.total_size(), 220);
    }

    #[test]
    fn test_empty_input_has_no_partitions() {
        let parts = run(
            &[],
            Limits {
                max_entries: Some(3),
                max_size: None,
            },
        );
        assert!(parts.is_empty());
    }

    #[test]
    fn test_releasing_drops_closed_entries() {
        let mut store = EntryStore::new(SizeTransform::default());
        let mut d = LimitDispatcher::new(
            Limits {
                max_entries: Some(2),
                max_size: None,
            },
            &SizeTransform::default(),
        )
        .unwrap()
        .releasing();

        for i in 0..5u64 {
            let id = store.add(format!("/f{}", i), 1, false).unwrap();
            d.dispatch(&mut store, id, &mut NullSink).unwrap();
        }
        // [0,1] and [2,3] are closed and released; 4 is still open
        assert_eq!(store.len(), 1);
        assert_eq!(d.dispatched(), 5);

        let parts = d.finish(&mut store, &mut NullSink).unwrap();
        assert!(store.is_empty());
        assert_eq!(parts.total_entries(), 5);
        assert!(parts.iter().all(|p| p.members().is_empty()));
    }
}
