//! partsync - Partition Huge Trees, Copy Them In Parallel
//!
//! A tool for migrating directory trees too large for a single sequential
//! copy. The tree is split into partitions bounded by entry count or size,
//! and every partition becomes a copy job run on a bounded pool of local or
//! remote workers. Copying starts as soon as the first partition closes.
//!
//! # Features
//!
//! - **Balanced Partitions**: a fixed number of partitions filled largest
//!   entry first, or as many partitions as per-partition limits require.
//!
//! - **Streaming**: in live mode partitions are handed over while the crawl
//!   is still running, and their entries are released from memory.
//!
//! - **Filesystem Job Queue**: jobs, claims and control flags are plain
//!   files in a run directory, so a run can be inspected with `ls` and
//!   resumed after an interrupt or a crash.
//!
//! - **Local or Remote Workers**: jobs are `/bin/sh` scripts, run locally or
//!   piped to `ssh <target> /bin/sh -s`, with rsync, cpio or tar.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │    Crawler thread        │
//!                 │  (walkdir, bounded chan) │
//!                 └────────────┬─────────────┘
//!                              │ entries
//!                              ▼
//!                 ┌──────────────────────────┐
//!                 │  Bin packer │ Limit      │
//!                 │  (fixed N)  │ dispatcher │
//!                 └────────────┬─────────────┘
//!                              │ partition closed
//!                              ▼
//!                 ┌──────────────────────────┐
//!                 │  Hook chain              │
//!                 │  listing ─▶ hooks/enqueue│
//!                 └────────────┬─────────────┘
//!                              │ job script
//!                              ▼
//!                 ┌──────────────────────────┐
//!                 │  <run>/queue/  (FIFO)    │
//!                 └────────────┬─────────────┘
//!                              │ rename into work/
//!                              ▼
//!  ┌─────────────────────────────────────────────────────────────┐
//!  │                      Dispatch loop                           │
//!  │  ┌────────┐  ┌────────┐  ┌────────┐          ┌────────┐     │
//!  │  │ slot 0 │  │ slot 1 │  │ slot 2 │   ...    │ slot N │     │
//!  │  │ local  │  │ host1  │  │ host2  │          │ host1  │     │
//!  │  └────────┘  └────────┘  └────────┘          └────────┘     │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Eight balanced listings
//! partsync part -n 8 -o /tmp/parts /data
//!
//! # Copy with 16 jobs over two hosts sharing /shared
//! partsync sync -n 16 -w node1 -w node2 -d /shared/partsync /data /mnt/backup
//! ```

pub mod config;
pub mod crawl;
pub mod entry;
pub mod error;
pub mod hook;
pub mod input;
pub mod partition;
pub mod progress;
pub mod queue;
pub mod sync;
pub mod worker;

pub use config::{CliArgs, Command, PartitionConfig, SyncConfig};
pub use error::{PartError, Result};
pub use partition::{PartitionReport, PartitionRunner};
pub use sync::{SyncReport, SyncRun};
