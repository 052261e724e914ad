//! backend
//!
//! Abstraction over the copy-on-write storage engine.
//!
//! # Architecture
//!
//! The [`StorageBackend`] trait is the only way jobs touch storage. The
//! binary wires in [`ZfsBackend`], which drives the `zfs` command line;
//! tests use [`mock::MockBackend`], which keeps datasets and snapshots in
//! memory.
//!
//! - Backend failures are per-job errors; they never abort a batch
//! - Mutations are suppressed (logged only) in dry-run mode
//!
//! # Modules
//!
//! - `traits`: `StorageBackend` trait, request and error types
//! - [`zfs`]: subprocess implementation
//! - [`mock`]: in-memory implementation for deterministic testing

pub mod mock;
mod traits;
pub mod zfs;

pub use traits::*;
pub use zfs::{ZfsBackend, DEFAULT_ZFS_PATH};
