//! Entry arena
//!
//! Entries are stored in insertion order and addressed by an absolute
//! [`EntryId`]. Partitions hold ids, never entries. In live mode the
//! dispatcher releases entries from the front once their partition has
//! been written out, so ids stay stable while memory follows the open
//! partition only.

use crate::entry::size::SizeTransform;
use crate::error::EntryError;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Matches `<integer size> <value>`; the value runs to end of line
static ARBITRARY_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?\d+)[ \t]+(.+)$").expect("Invalid arbitrary value regex")
});

/// Stable identifier of an entry within one [`EntryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

/// A crawled path or declared value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path (crawl) or arbitrary value (input line)
    pub path: String,
    /// Raw size in bytes
    pub size: u64,
    /// Size after the transform, used for every partitioning decision
    pub effective_size: u64,
    /// Whether this entry is a directory
    pub is_directory: bool,
}

/// Ordered, index-addressed collection of entries
#[derive(Debug, Default)]
pub struct EntryStore {
    transform: SizeTransform,
    /// Id of `entries[0]`
    base: u64,
    entries: VecDeque<Entry>,
}

impl EntryStore {
    /// Create an empty store applying `transform` to every added entry
    pub fn new(transform: SizeTransform) -> Self {
        Self {
            transform,
            base: 0,
            entries: VecDeque::new(),
        }
    }

    /// The size transform applied at creation time
    pub fn transform(&self) -> &SizeTransform {
        &self.transform
    }

    /// Add an entry, computing its effective size
    pub fn add(
        &mut self,
        path: impl Into<String>,
        raw_size: u64,
        is_directory: bool,
    ) -> Result<EntryId, EntryError> {
        self.entries
            .try_reserve(1)
            .map_err(|_| EntryError::Allocation {
                what: "file entries",
                requested: 1,
            })?;

        let id = EntryId(self.base + self.entries.len() as u64);
        self.entries.push_back(Entry {
            path: path.into(),
            size: raw_size,
            effective_size: self.transform.effective(raw_size),
            is_directory,
        });
        Ok(id)
    }

    /// Parse and add one `<size> <value>` line
    pub fn add_arbitrary(&mut self, line: &str) -> Result<EntryId, EntryError> {
        let (size, value) = parse_arbitrary_line(line)?;
        self.add(value, size, false)
    }

    /// Look up an entry; released or unknown ids return `None`
    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        let offset = id.0.checked_sub(self.base)?;
        self.entries.get(usize::try_from(offset).ok()?)
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries ever added, including released ones
    pub fn total_added(&self) -> u64 {
        self.base + self.entries.len() as u64
    }

    /// Iterate held entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> + '_ {
        let base = self.base;
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, e)| (EntryId(base + i as u64), e))
    }

    /// Ids of held entries in insertion order
    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        (self.base..self.total_added()).map(EntryId)
    }

    /// Sum of effective sizes of held entries
    pub fn total_effective_size(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.effective_size))
    }

    /// Sum of raw sizes of held entries
    pub fn total_raw_size(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.size))
    }

    /// Drop every entry up to and including `id`
    pub fn release_through(&mut self, id: EntryId) {
        while self.base <= id.0 && !self.entries.is_empty() {
            self.entries.pop_front();
            self.base += 1;
        }
    }
}

/// Parse `<integer size> <value>`
pub fn parse_arbitrary_line(line: &str) -> Result<(u64, String), EntryError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let caps = ARBITRARY_LINE_REGEX
        .captures(line)
        .ok_or_else(|| EntryError::Parse {
            line: line.to_string(),
            reason: "expected '<size> <value>'".into(),
        })?;

    let size_str = &caps[1];
    let size = size_str
        .trim_start_matches('+')
        .parse::<u64>()
        .map_err(|e| EntryError::Parse {
            line: line.to_string(),
            reason: format!("invalid size '{}': {}", size_str, e),
        })?;

    Ok((size, caps[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let mut store = EntryStore::new(SizeTransform::default());
        let a = store.add("/a", 100, false).unwrap();
        let b = store.add("/b", 0, true).unwrap();

        assert_eq!(a, EntryId(0));
        assert_eq!(b, EntryId(1));
        assert_eq!(store.get(a).unwrap().path, "/a");
        assert!(store.get(b).unwrap().is_directory);
        assert_eq!(store.total_effective_size(), 100);
        assert!(store.get(EntryId(2)).is_none());
    }

    #[test]
    fn test_transform_applied_once() {
        let mut store = EntryStore::new(SizeTransform::new(0, 1, 10).unwrap());
        let id = store.add("/f", 15, false).unwrap();
        let entry = store.get(id).unwrap();
        assert_eq!(entry.size, 15);
        assert_eq!(entry.effective_size, 20);
        assert_eq!(store.total_raw_size(), 15);
    }

    #[test]
    fn test_release_keeps_ids_stable() {
        let mut store = EntryStore::new(SizeTransform::default());
        for i in 0..5 {
            store.add(format!("/{}", i), i, false).unwrap();
        }
        store.release_through(EntryId(2));

        assert_eq!(store.len(), 2);
        assert_eq!(store.total_added(), 5);
        assert!(store.get(EntryId(1)).is_none());
        assert_eq!(store.get(EntryId(3)).unwrap().path, "/3");
        assert_eq!(store.ids().collect::<Vec<_>>(), vec![EntryId(3), EntryId(4)]);

        let next = store.add("/5", 5, false).unwrap();
        assert_eq!(next, EntryId(5));
    }

    #[test]
    fn test_parse_arbitrary_line() {
        assert_eq!(
            parse_arbitrary_line("1024 some value with spaces").unwrap(),
            (1024, "some value with spaces".to_string())
        );
        assert_eq!(parse_arbitrary_line("  7\t/x\n").unwrap(), (7, "/x".to_string()));
        assert!(parse_arbitrary_line("nope").is_err());
        assert!(parse_arbitrary_line("12").is_err());
        assert!(parse_arbitrary_line("-5 /neg").is_err());
        assert!(parse_arbitrary_line("").is_err());
    }

    #[test]
    fn test_add_arbitrary() {
        let mut store = EntryStore::new(SizeTransform::default());
        let id = store.add_arbitrary("42 answer").unwrap();
        let entry = store.get(id).unwrap();
        assert_eq!(entry.size, 42);
        assert_eq!(entry.path, "answer");
        assert!(matches!(
            store.add_arbitrary("x y"),
            Err(EntryError::Parse { .. })
        ));
        assert_eq!(store.len(), 1);
    }
}
