//! Partition listings
//!
//! A closed partition is written out as its member paths, one per line,
//! either to stdout (prefixed with the partition index and a tab) or to a
//! file named `<template>.<index>`.

use crate::entry::{Entry, EntryStore};
use crate::partition::{Partition, PartitionStore};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Where listings go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingTarget {
    /// `index<TAB>path` lines on stdout
    Stdout,
    /// One file per partition, `<template>.<index>`
    Template(PathBuf),
}

impl ListingTarget {
    /// Parse an output option; `-` means stdout
    pub fn from_option(value: Option<&Path>) -> Self {
        match value {
            None => ListingTarget::Stdout,
            Some(p) if p.as_os_str() == "-" => ListingTarget::Stdout,
            Some(p) => ListingTarget::Template(p.to_path_buf()),
        }
    }
}

/// Listing file path for partition `index` of `template`
pub fn template_path(template: &Path, index: u32) -> PathBuf {
    let mut name = template.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Writes the member list of each closed partition
#[derive(Debug, Clone)]
pub struct ListingWriter {
    target: ListingTarget,
    add_slash: bool,
}

impl ListingWriter {
    /// Create a writer for `target`
    pub fn new(target: ListingTarget) -> Self {
        Self {
            target,
            add_slash: false,
        }
    }

    /// Terminate directory paths with a slash
    pub fn add_slash(mut self, enabled: bool) -> Self {
        self.add_slash = enabled;
        self
    }

    /// The configured target
    pub fn target(&self) -> &ListingTarget {
        &self.target
    }

    /// Listing file of partition `index`, `None` when writing to stdout
    pub fn listing_path(&self, index: u32) -> Option<PathBuf> {
        match &self.target {
            ListingTarget::Stdout => None,
            ListingTarget::Template(t) => Some(template_path(t, index)),
        }
    }

    fn display_path<'a>(&self, entry: &'a Entry) -> std::borrow::Cow<'a, str> {
        if self.add_slash && entry.is_directory && !entry.path.ends_with('/') {
            format!("{}/", entry.path).into()
        } else {
            entry.path.as_str().into()
        }
    }

    /// Write the listing of a closed partition
    ///
    /// Returns the listing file path, or `None` when writing to stdout.
    pub fn write(&self, partition: &Partition, entries: &EntryStore) -> io::Result<Option<PathBuf>> {
        match &self.target {
            ListingTarget::Stdout => {
                let stdout = io::stdout();
                let mut out = BufWriter::new(stdout.lock());
                self.write_to(&mut out, partition, entries, Some(partition.index))?;
                out.flush()?;
                Ok(None)
            }
            ListingTarget::Template(t) => {
                let path = template_path(t, partition.index);
                let mut out = BufWriter::new(File::create(&path)?);
                self.write_to(&mut out, partition, entries, None)?;
                out.flush()?;
                Ok(Some(path))
            }
        }
    }

    /// Write member paths to `out`, optionally prefixed with an index column
    pub fn write_to<W: Write>(
        &self,
        out: &mut W,
        partition: &Partition,
        entries: &EntryStore,
        prefix: Option<u32>,
    ) -> io::Result<()> {
        for id in partition.members() {
            let entry = entries.get(*id).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("entry {} of partition {} was released", id.0, partition.index),
                )
            })?;
            let path = self.display_path(entry);
            match prefix {
                Some(index) => writeln!(out, "{}\t{}", index, path)?,
                None => writeln!(out, "{}", path)?,
            }
        }
        Ok(())
    }
}

/// `Part #i: size = S, n file(s)` lines, in index order
pub fn summary_lines(parts: &PartitionStore) -> Vec<String> {
    parts
        .iter()
        .map(|p| {
            format!(
                "Part #{}: size = {}, {} file(s)",
                p.index, p.total_size, p.entry_count
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SizeTransform;
    use tempfile::tempdir;

    fn closed_partition(entries: &mut EntryStore) -> PartitionStore {
        let a = entries.add("/data/a", 10, false).unwrap();
        let b = entries.add("/data/dir", 0, true).unwrap();
        let mut parts = PartitionStore::new();
        let idx = parts.open(0).unwrap();
        parts.assign(idx, a, 10).unwrap();
        parts.assign(idx, b, 0).unwrap();
        parts.close(idx).unwrap();
        parts
    }

    #[test]
    fn test_template_path() {
        assert_eq!(
            template_path(Path::new("/tmp/part"), 3),
            PathBuf::from("/tmp/part.3")
        );
    }

    #[test]
    fn test_from_option() {
        assert_eq!(ListingTarget::from_option(None), ListingTarget::Stdout);
        assert_eq!(
            ListingTarget::from_option(Some(Path::new("-"))),
            ListingTarget::Stdout
        );
        assert_eq!(
            ListingTarget::from_option(Some(Path::new("out"))),
            ListingTarget::Template(PathBuf::from("out"))
        );
    }

    #[test]
    fn test_write_with_index_prefix_and_slash() {
        let mut entries = EntryStore::new(SizeTransform::default());
        let parts = closed_partition(&mut entries);
        let writer = ListingWriter::new(ListingTarget::Stdout).add_slash(true);

        let mut buf = Vec::new();
        writer
            .write_to(&mut buf, parts.get(0).unwrap(), &entries, Some(0))
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "0\t/data/a\n0\t/data/dir/\n");
    }

    #[test]
    fn test_write_template_file() {
        let dir = tempdir().unwrap();
        let template = dir.path().join("list");
        let mut entries = EntryStore::new(SizeTransform::default());
        let parts = closed_partition(&mut entries);
        let writer = ListingWriter::new(ListingTarget::Template(template.clone()));

        let path = writer.write(parts.get(0).unwrap(), &entries).unwrap();
        assert_eq!(path, Some(dir.path().join("list.0")));
        let content = std::fs::read_to_string(dir.path().join("list.0")).unwrap();
        assert_eq!(content, "/data/a\n/data/dir\n");
    }

    #[test]
    fn test_summary_lines() {
        let mut entries = EntryStore::new(SizeTransform::default());
        let parts = closed_partition(&mut entries);
        assert_eq!(summary_lines(&parts), vec!["Part #0: size = 10, 2 file(s)"]);
    }
}
