//! jobs
//!
//! The three job kinds and their execution.
//!
//! # Architecture
//!
//! A [`Job`] is a named, immutable definition built once from configuration.
//! Its behavior is a closed sum type, [`JobKind`], with one variant per job
//! type; [`Job::run`] dispatches on it. Jobs never own their collaborators:
//! every run borrows the backend, hook runner, retention cache and lock
//! manager from [`Services`].
//!
//! # Modules
//!
//! - [`snapshot`]: create a timestamped snapshot between two hooks
//! - [`clean`]: expire snapshots by age and squash identical neighbours
//! - [`copy`]: incremental send/receive guarded by keep-counts
//! - [`jobset`]: job registry and named-group resolution
//!
//! # Invariants
//!
//! - A disabled job does nothing and reports [`JobOutcome::Disabled`]
//! - A dataset a job has seen exist is not looked up again by that job
//! - Errors are per job; the batch runner logs them and moves on

pub mod clean;
pub mod copy;
pub mod jobset;
pub mod snapshot;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::info_span;

use crate::backend::{BackendError, StorageBackend};
use crate::cache::CacheError;
use crate::core::ops::LockError;
use crate::core::types::{DatasetId, SnapshotRef, TypeError};
use crate::engine::{Context, Services};
use crate::hooks::HookError;

pub use clean::{CleanJob, CleanReport};
pub use copy::{CopyJob, CopyOutcome, Destination};
pub use jobset::{JobId, JobRegistry, JobsetMember, Resolution};
pub use snapshot::{SnapshotJob, SnapshotOutcome};

/// The three job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    Snapshot,
    Clean,
    Copy,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Snapshot, JobType::Clean, JobType::Copy];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Snapshot => "snapshot",
            JobType::Clean => "clean",
            JobType::Copy => "copy",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(JobType::Snapshot),
            "clean" => Ok(JobType::Clean),
            "copy" => Ok(JobType::Copy),
            other => Err(format!("unknown job type '{other}'")),
        }
    }
}

/// Errors that abort a single job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("dataset '{0}' does not exist")]
    DatasetMissing(DatasetId),

    #[error("{event} hook failed with status {status}")]
    HookFailed { event: String, status: i32 },

    #[error("no snapshots of '{0}' to send")]
    NoSourceSnapshots(DatasetId),

    #[error("replication of {snapshot} to '{destination}' failed: {source}")]
    Replication {
        snapshot: SnapshotRef,
        destination: DatasetId,
        source: BackendError,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl JobError {
    /// A lock timeout is reported as a skip, not a failure.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, JobError::Lock(e) if e.is_timeout())
    }
}

/// Per-job memo of dataset existence.
///
/// Only positive answers are kept: a missing destination may be created by
/// the job itself, so it is looked up again on the next check.
#[derive(Debug, Default)]
pub struct ExistsMemo {
    seen: RefCell<HashSet<DatasetId>>,
}

impl ExistsMemo {
    pub fn check(
        &self,
        backend: &dyn StorageBackend,
        dataset: &DatasetId,
    ) -> Result<bool, BackendError> {
        if self.seen.borrow().contains(dataset) {
            return Ok(true);
        }
        let exists = backend.exists(dataset)?;
        if exists {
            self.seen.borrow_mut().insert(dataset.clone());
        }
        Ok(exists)
    }
}

/// Job-specific definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Snapshot(SnapshotJob),
    Clean(CleanJob),
    Copy(CopyJob),
}

/// A configured job.
#[derive(Debug)]
pub struct Job {
    pub name: String,
    pub enabled: bool,
    pub kind: JobKind,
    exists: ExistsMemo,
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Disabled,
    Snapshot(SnapshotOutcome),
    Clean(CleanReport),
    Copy(CopyOutcome),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Disabled => write!(f, "disabled"),
            JobOutcome::Snapshot(o) => write!(f, "created {}", o.snapshot),
            JobOutcome::Clean(r) => write!(
                f,
                "destroyed {} snapshot(s) across {} dataset(s)",
                r.destroyed(),
                r.datasets.len()
            ),
            JobOutcome::Copy(CopyOutcome::InSync { snapshot }) => {
                write!(f, "already in sync at {snapshot}")
            }
            JobOutcome::Copy(CopyOutcome::Sent { snapshot, base }) => match base {
                Some(base) => write!(f, "sent {snapshot} incrementally from {base}"),
                None => write!(f, "sent {snapshot} in full"),
            },
        }
    }
}

impl Job {
    pub fn new(name: impl Into<String>, enabled: bool, kind: JobKind) -> Self {
        Self {
            name: name.into(),
            enabled,
            kind,
            exists: ExistsMemo::default(),
        }
    }

    pub fn job_type(&self) -> JobType {
        match self.kind {
            JobKind::Snapshot(_) => JobType::Snapshot,
            JobKind::Clean(_) => JobType::Clean,
            JobKind::Copy(_) => JobType::Copy,
        }
    }

    /// `type.name`, as used in jobset member lists.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.job_type(), self.name)
    }

    /// Run the job once.
    pub fn run(&self, ctx: &Context, services: &Services<'_>) -> Result<JobOutcome, JobError> {
        let _span = info_span!("job", job = %self.qualified_name()).entered();

        if !self.enabled {
            return Ok(JobOutcome::Disabled);
        }

        match &self.kind {
            JobKind::Snapshot(job) => job
                .run(&self.exists, ctx, services)
                .map(JobOutcome::Snapshot),
            JobKind::Clean(job) => job.run(&self.exists, ctx, services).map(JobOutcome::Clean),
            JobKind::Copy(job) => job.run(&self.exists, services).map(JobOutcome::Copy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockBackend, MockOperation};

    #[test]
    fn job_type_round_trips_through_str() {
        for ty in JobType::ALL {
            assert_eq!(ty.as_str().parse::<JobType>().unwrap(), ty);
        }
        assert!("jobset".parse::<JobType>().is_err());
    }

    #[test]
    fn exists_memo_queries_once() {
        let backend = MockBackend::new();
        let ds = DatasetId::parse("tank/a").unwrap();
        backend.add_dataset(&ds);

        let memo = ExistsMemo::default();
        assert!(memo.check(&backend, &ds).unwrap());
        assert!(memo.check(&backend, &ds).unwrap());

        let queries = backend
            .operations()
            .into_iter()
            .filter(|op| matches!(op, MockOperation::Exists { .. }))
            .count();
        assert_eq!(queries, 1);
    }

    #[test]
    fn exists_memo_rechecks_missing() {
        let backend = MockBackend::new();
        let ds = DatasetId::parse("backup/a").unwrap();

        let memo = ExistsMemo::default();
        assert!(!memo.check(&backend, &ds).unwrap());
        backend.add_dataset(&ds);
        assert!(memo.check(&backend, &ds).unwrap());
    }

    #[test]
    fn qualified_name_uses_type_prefix() {
        let job = Job::new(
            "home",
            true,
            JobKind::Snapshot(SnapshotJob {
                target: DatasetId::parse("tank/home").unwrap(),
                recursive: false,
            }),
        );
        assert_eq!(job.qualified_name(), "snapshot.home");
        assert_eq!(job.job_type(), JobType::Snapshot);
    }

    #[test]
    fn lock_timeout_is_a_skip() {
        let err = JobError::Lock(LockError::Timeout {
            resource: "tank".into(),
            waited: std::time::Duration::from_secs(1),
        });
        assert!(err.is_lock_timeout());
        assert!(!JobError::NoSourceSnapshots(DatasetId::parse("tank").unwrap()).is_lock_timeout());
    }
}
