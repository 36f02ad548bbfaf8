//! Partition accumulators
//!
//! A partition is a running total (entry count, effective size) plus the
//! ids of the entries assigned to it. Totals only grow while the partition
//! is open; closing freezes them.

use crate::entry::EntryId;
use crate::error::DispatchError;

/// Lifecycle of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Accepting entries
    Open,
    /// Membership fixed
    Closed,
}

/// One group of entries destined for a single copy job
#[derive(Debug, Clone)]
pub struct Partition {
    /// Ordinal, starting at 0
    pub index: u32,
    /// Number of entries assigned
    pub entry_count: u64,
    /// Preload baseline plus the effective size of every entry
    pub total_size: u64,
    preload: u64,
    members: Vec<EntryId>,
    state: PartitionState,
}

impl Partition {
    fn new(index: u32, preload: u64) -> Self {
        Self {
            index,
            entry_count: 0,
            total_size: preload,
            preload,
            members: Vec::new(),
            state: PartitionState::Open,
        }
    }

    /// Preload baseline included in `total_size`
    pub fn preload(&self) -> u64 {
        self.preload
    }

    /// `total_size` without the preload baseline
    pub fn entries_size(&self) -> u64 {
        self.total_size - self.preload
    }

    /// Ids of member entries, in assignment order
    pub fn members(&self) -> &[EntryId] {
        &self.members
    }

    /// Current lifecycle state
    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// Whether membership is fixed
    pub fn is_closed(&self) -> bool {
        self.state == PartitionState::Closed
    }

    /// Whether no entry has been assigned
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Total size if `size` were added
    pub fn size_with(&self, size: u64) -> u64 {
        self.total_size.saturating_add(size)
    }

    fn push(&mut self, id: EntryId, size: u64) {
        debug_assert_eq!(self.state, PartitionState::Open, "push on closed partition");
        self.members.push(id);
        self.entry_count += 1;
        self.total_size = self.total_size.saturating_add(size);
    }

    /// Forget member ids once the listing has been written out
    pub(crate) fn release_members(&mut self) {
        self.members = Vec::new();
    }
}

/// Ordered collection of partitions, addressed by index
#[derive(Debug, Default, Clone)]
pub struct PartitionStore {
    partitions: Vec<Partition>,
}

impl PartitionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new partition with `preload` as its baseline, returning its index
    pub fn open(&mut self, preload: u64) -> Result<u32, DispatchError> {
        let index = u32::try_from(self.partitions.len()).map_err(|_| DispatchError::IndexOverflow)?;
        self.partitions.push(Partition::new(index, preload));
        Ok(index)
    }

    /// Assign an entry to an open partition
    pub fn assign(&mut self, index: u32, id: EntryId, size: u64) -> Result<(), DispatchError> {
        let part = self.get_mut(index)?;
        part.push(id, size);
        Ok(())
    }

    /// Freeze a partition
    pub fn close(&mut self, index: u32) -> Result<&Partition, DispatchError> {
        let part = self.get_mut(index)?;
        part.state = PartitionState::Closed;
        Ok(part)
    }

    /// Look up a partition
    pub fn get(&self, index: u32) -> Option<&Partition> {
        self.partitions.get(index as usize)
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Result<&mut Partition, DispatchError> {
        self.partitions
            .get_mut(index as usize)
            .ok_or(DispatchError::UnknownPartition(index))
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether no partition was opened
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Iterate partitions in index order
    pub fn iter(&self) -> std::slice::Iter<'_, Partition> {
        self.partitions.iter()
    }

    /// Sum of entry counts
    pub fn total_entries(&self) -> u64 {
        self.partitions.iter().map(|p| p.entry_count).sum()
    }

    /// Sum of total sizes, preload included
    pub fn total_size(&self) -> u64 {
        self.partitions
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.total_size))
    }

    /// Sum of preload baselines
    pub fn total_preload(&self) -> u64 {
        self.partitions
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.preload))
    }
}

impl<'a> IntoIterator for &'a PartitionStore {
    type Item = &'a Partition;
    type IntoIter = std::slice::Iter<'a, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
