//! backend::traits
//!
//! StorageBackend trait definition for the copy-on-write storage engine.
//!
//! # Design
//!
//! Jobs never spawn storage commands themselves; every list, diff, create,
//! destroy and send/receive goes through this trait. The trait is
//! synchronous: a run executes one job at a time and each backend call
//! blocks until the underlying command exits.
//!
//! Read-only calls (`exists`, listings, `diff`) always execute. Mutating
//! calls are expected to be pure logging no-ops when the implementation was
//! built for a dry run.
//!
//! # Example
//!
//! ```ignore
//! use snapwarden::backend::{StorageBackend, BackendError};
//!
//! fn latest(backend: &dyn StorageBackend, ds: &DatasetId) -> Result<Option<String>, BackendError> {
//!     let snaps = backend.list_snapshots(ds, false)?;
//!     Ok(snaps.last().map(|s| s.name.clone()))
//! }
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::types::{DatasetId, SnapshotRef};

/// Stage of a send/receive pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The producer writing the replication stream.
    Sender,
    /// The consumer applying the stream to the destination.
    Receiver,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Sender => write!(f, "sender"),
            Stage::Receiver => write!(f, "receiver"),
        }
    }
}

/// Errors from backend operations.
///
/// Every variant that wraps a failed command carries the diagnostic output
/// so it can be surfaced in the job's error log.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The command could not be started.
    #[error("failed to run '{command}': {message}")]
    Spawn { command: String, message: String },

    /// The command ran and exited unsuccessfully.
    #[error("'{command}' failed ({}): {stderr}", describe_code(*.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// One stage of a send/receive pipeline failed.
    #[error("{stage} process failed ({}): {stderr}", describe_code(*.code))]
    StageFailed {
        stage: Stage,
        code: Option<i32>,
        stderr: String,
    },

    /// Command output could not be interpreted.
    #[error("unexpected output from '{command}': {message}")]
    Parse { command: String, message: String },
}

impl BackendError {
    /// The failed pipeline stage, if this is a replication failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BackendError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// A snapshot as reported by the backend.
///
/// The creation time is encoded in `name` (see
/// [`parse_snapshot_time`](crate::core::types::parse_snapshot_time)).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotInfo {
    pub dataset: DatasetId,
    pub name: String,
}

impl SnapshotInfo {
    pub fn to_ref(&self) -> SnapshotRef {
        self.dataset.snapshot(self.name.clone())
    }
}

/// Parameters for one send/receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRequest {
    /// Dataset to send from.
    pub source: DatasetId,
    /// Snapshot of `source` to send.
    pub snapshot: String,
    /// Dataset to receive into.
    pub destination: DatasetId,
    /// Common snapshot to send incrementally from; `None` for a full stream.
    pub incremental_base: Option<String>,
    /// Send descendants and properties as well.
    pub replicate: bool,
    /// Roll the destination back to its latest snapshot before receiving.
    pub rollback: bool,
    /// Properties forced on the received dataset.
    pub property_overwrites: BTreeMap<String, String>,
    /// Properties excluded from the received stream.
    pub property_ignores: Vec<String>,
}

/// The storage engine capability consumed by jobs.
///
/// # Contract
///
/// - `list_snapshots` returns snapshots sorted by name ascending (per
///   dataset when `recurse` is set)
/// - `list_datasets` returns `root` and all its descendants, sorted by name
/// - `diff` returns `true` when the two snapshots differ in content; a
///   failure to compare is an error, never "no difference"
/// - `replicate` runs sender and receiver concurrently connected by a pipe;
///   failure of either stage fails the whole call with
///   [`BackendError::StageFailed`], naming the receiver when a failed
///   receiver broke the pipe under the sender
pub trait StorageBackend {
    /// Whether `dataset` exists.
    fn exists(&self, dataset: &DatasetId) -> Result<bool, BackendError>;

    /// `root` and every dataset below it.
    fn list_datasets(&self, root: &DatasetId) -> Result<Vec<DatasetId>, BackendError>;

    /// Snapshots of `dataset` (and its descendants when `recurse`).
    fn list_snapshots(
        &self,
        dataset: &DatasetId,
        recurse: bool,
    ) -> Result<Vec<SnapshotInfo>, BackendError>;

    /// True if the content of `dataset@a` and `dataset@b` differs.
    fn diff(&self, dataset: &DatasetId, a: &str, b: &str) -> Result<bool, BackendError>;

    /// Create `dataset@name`, including descendants when `recursive`.
    fn create_snapshot(
        &self,
        dataset: &DatasetId,
        name: &str,
        recursive: bool,
    ) -> Result<(), BackendError>;

    /// Destroy `dataset@name`.
    fn destroy_snapshot(&self, dataset: &DatasetId, name: &str) -> Result<(), BackendError>;

    /// Send `source@snapshot` into `destination`.
    fn replicate(&self, request: &ReplicationRequest) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failed_names_the_stage() {
        let err = BackendError::StageFailed {
            stage: Stage::Receiver,
            code: Some(1),
            stderr: "cannot receive: destination has been modified".into(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("receiver process failed"));
        assert!(msg.contains("exit status 1"));
        assert!(msg.contains("destination has been modified"));
        assert_eq!(err.stage(), Some(Stage::Receiver));
    }

    #[test]
    fn signal_termination_is_described() {
        let err = BackendError::CommandFailed {
            command: "zfs destroy tank@x".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
        assert_eq!(err.stage(), None);
    }
}
