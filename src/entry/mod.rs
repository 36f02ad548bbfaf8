//! Entry module
//!
//! Entries are the unit being partitioned: a crawled path or an arbitrary
//! value, each tagged with a size.

pub mod size;
pub mod store;

pub use size::SizeTransform;
pub use store::{parse_arbitrary_line, Entry, EntryId, EntryStore};
