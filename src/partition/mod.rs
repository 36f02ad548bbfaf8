//! Partitioning engine
//!
//! Entries are grouped into partitions by one of two dispatchers:
//!
//! - [`BinPacker`]: a fixed number of partitions, balanced by size. Needs
//!   the whole entry set before it can start.
//! - [`LimitDispatcher`]: partitions closed on entry-count or size limits,
//!   in a single forward pass. Works on unbounded input.
//!
//! Both report partition boundaries to a [`PartitionSink`](crate::hook::PartitionSink),
//! which is where listings get written and hooks run.

pub mod binpack;
pub mod limits;
pub mod output;
pub mod run;
pub mod store;

pub use binpack::BinPacker;
pub use limits::{LimitDispatcher, Limits};
pub use output::{ListingTarget, ListingWriter};
pub use run::{PartitionMode, PartitionReport, PartitionRunner};
pub use store::{Partition, PartitionState, PartitionStore};
