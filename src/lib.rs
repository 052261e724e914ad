//! snapwarden - snapshot lifecycle and incremental replication
//!
//! snapwarden takes periodic snapshots of copy-on-write datasets, prunes
//! them by age and redundancy, and replicates them incrementally to another
//! pool. Snapshots that serve as replication anchors are pinned by a
//! persistent keep-count so pruning never breaks an incremental chain.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Runs resolved jobs and records per-job outcomes
//! - [`jobs`] - Snapshot, clean and copy jobs; jobset resolution
//! - [`core`] - Domain types, configuration, paths and locking
//! - [`cache`] - Persistent keep-count store
//! - [`backend`] - Single interface for all storage operations
//! - [`hooks`] - External event scripts
//! - [`logging`] - Diagnostics setup
//!
//! # Correctness Invariants
//!
//! 1. Nothing is mutated without `--really`
//! 2. A snapshot with a positive keep-count is never destroyed
//! 3. A failed replication leaves keep-counts as they were
//! 4. Jobs refuse to run against an unmigrated retention store

pub mod backend;
pub mod cache;
pub mod cli;
pub mod core;
pub mod engine;
pub mod hooks;
pub mod jobs;
pub mod logging;
