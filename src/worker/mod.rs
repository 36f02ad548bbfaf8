//! Worker pool
//!
//! Runs queued copy jobs on a bounded number of slots, locally or over
//! ssh, with two-stage interrupt handling.

pub mod executor;
pub mod interrupt;
pub mod pool;
pub mod preflight;

pub use executor::{slot_executors, Executor, JobHandle, JobStatus, LocalExecutor, RemoteExecutor};
pub use interrupt::{Interrupt, InterruptState};
pub use pool::{DispatchLoop, DispatchOutcome, DispatchProgress, DEFAULT_POLL_INTERVAL};
pub use preflight::check_tool;
