//! core::ops
//!
//! Cross-process coordination for mutating operations.
//!
//! # Modules
//!
//! - [`lock`] - Per-pool / per-dataset exclusive locks with timeout
//!
//! # Architecture
//!
//! Every mutating job step:
//! 1. Acquires the lock for the pool it mutates (bounded by a timeout)
//! 2. Performs its backend calls
//! 3. Releases the lock on scope exit, success or failure
//!
//! A timeout skips only the current dataset's step; the rest of the run
//! proceeds.

pub mod lock;

pub use lock::{LockError, LockManager, ResourceLock, DEFAULT_LOCK_TIMEOUT};
