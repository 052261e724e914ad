//! engine
//!
//! Runs resolved jobs against the shared services.
//!
//! # Architecture
//!
//! A run is:
//!
//! ```text
//! Resolve names -> for each job: run -> record outcome -> report
//! ```
//!
//! [`Context`] carries per-invocation settings (dry-run flag, clock);
//! [`Services`] bundles the collaborators every job borrows. Both are built
//! once by the CLI and passed by reference.
//!
//! # Invariants
//!
//! - Jobs run sequentially in resolution order
//! - A failing job never stops the batch
//! - A lock timeout is recorded as a skip, not a failure
//!
//! # Example
//!
//! ```ignore
//! use snapwarden::engine::{run_batch, Context, Services};
//!
//! let resolution = registry.resolve(&names, Some(JobType::Snapshot));
//! let report = run_batch(&registry, &resolution.jobs, &ctx, &services);
//! println!("{} failed", report.failed());
//! ```

pub mod runner;

pub use runner::{run_batch, BatchReport, JobResult, JobStatus};

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::backend::StorageBackend;
use crate::cache::RetentionCache;
use crate::core::ops::{LockManager, DEFAULT_LOCK_TIMEOUT};
use crate::hooks::HookRunner;

/// Per-invocation execution settings.
#[derive(Debug, Clone)]
pub struct Context {
    /// Mutations are only performed when true.
    pub really: bool,
    /// Reference time for snapshot names and retention windows.
    pub now: DateTime<Utc>,
}

impl Context {
    /// Context for a run starting now.
    pub fn new(really: bool) -> Self {
        Self {
            really,
            now: Utc::now(),
        }
    }
}

/// Collaborators shared by every job in a run.
pub struct Services<'a> {
    pub backend: &'a dyn StorageBackend,
    pub hooks: &'a dyn HookRunner,
    pub cache: &'a RetentionCache,
    pub locks: &'a LockManager,
    /// Upper bound on waiting for any one lock.
    pub lock_timeout: Duration,
}

impl<'a> Services<'a> {
    pub fn new(
        backend: &'a dyn StorageBackend,
        hooks: &'a dyn HookRunner,
        cache: &'a RetentionCache,
        locks: &'a LockManager,
    ) -> Self {
        Self {
            backend,
            hooks,
            cache,
            locks,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}
