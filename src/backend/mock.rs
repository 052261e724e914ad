//! backend::mock
//!
//! In-memory backend for deterministic testing.
//!
//! # Design
//!
//! Every dataset carries a content generation that tests bump with
//! [`MockBackend::write`]. A snapshot freezes the generation current at
//! creation, so `diff` reports a difference exactly when something was
//! written between two snapshots. Replication copies snapshots (with their
//! generations) between datasets, enforcing the same preconditions a real
//! receiver does: an incremental stream needs the base on the destination,
//! and a full stream refuses to overwrite an existing dataset without
//! rollback.
//!
//! # Example
//!
//! ```
//! use snapwarden::backend::mock::MockBackend;
//! use snapwarden::backend::StorageBackend;
//! use snapwarden::core::types::DatasetId;
//!
//! let backend = MockBackend::new();
//! let ds = DatasetId::parse("tank/home").unwrap();
//! backend.add_snapshot(&ds, "202401010000");
//! backend.write(&ds);
//! backend.add_snapshot(&ds, "202401020000");
//!
//! assert!(backend.diff(&ds, "202401010000", "202401020000").unwrap());
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::traits::{BackendError, ReplicationRequest, SnapshotInfo, Stage, StorageBackend};
use crate::core::types::DatasetId;

/// Mock backend for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

#[derive(Debug, Default)]
struct MockDataset {
    /// Generation of the live (unsnapshotted) content.
    generation: u64,
    /// Snapshot name -> generation frozen at creation.
    snapshots: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct MockBackendInner {
    datasets: BTreeMap<DatasetId, MockDataset>,
    really: bool,
    fail_on: Option<FailOn>,
    operations: Vec<MockOperation>,
}

/// Configuration for which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    Exists(BackendError),
    ListDatasets(BackendError),
    ListSnapshots(BackendError),
    Diff(BackendError),
    CreateSnapshot(BackendError),
    DestroySnapshot(BackendError),
    Replicate(BackendError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    Exists {
        dataset: DatasetId,
    },
    ListDatasets {
        root: DatasetId,
    },
    ListSnapshots {
        dataset: DatasetId,
        recurse: bool,
    },
    Diff {
        dataset: DatasetId,
        a: String,
        b: String,
    },
    CreateSnapshot {
        dataset: DatasetId,
        name: String,
        recursive: bool,
    },
    DestroySnapshot {
        dataset: DatasetId,
        name: String,
    },
    Replicate(ReplicationRequest),
}

impl MockBackend {
    /// Create an empty mock backend that applies mutations.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBackendInner {
                datasets: BTreeMap::new(),
                really: true,
                fail_on: None,
                operations: Vec::new(),
            })),
        }
    }

    /// Record mutations without applying them, like a dry-run backend.
    pub fn dry_run(self) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.really = false;
        }
        self
    }

    /// Configure a failure for one operation type.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.fail_on = Some(fail_on);
        }
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_on = None;
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        let inner = self.inner.lock().unwrap();
        inner.operations.clone()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.operations.clear();
    }

    /// Create a dataset with no snapshots (no-op if it exists).
    pub fn add_dataset(&self, dataset: &DatasetId) {
        let mut inner = self.inner.lock().unwrap();
        inner.datasets.entry(dataset.clone()).or_default();
    }

    /// Snapshot the dataset's current content, creating the dataset if needed.
    pub fn add_snapshot(&self, dataset: &DatasetId, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.datasets.entry(dataset.clone()).or_default();
        let generation = entry.generation;
        entry.snapshots.insert(name.to_string(), generation);
    }

    /// Change the dataset's live content.
    pub fn write(&self, dataset: &DatasetId) {
        let mut inner = self.inner.lock().unwrap();
        inner.datasets.entry(dataset.clone()).or_default().generation += 1;
    }

    /// Whether the dataset exists (for test verification).
    pub fn has_dataset(&self, dataset: &DatasetId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.datasets.contains_key(dataset)
    }

    /// Snapshot names of one dataset, ascending (for test verification).
    pub fn snapshot_names(&self, dataset: &DatasetId) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .datasets
            .get(dataset)
            .map(|d| d.snapshots.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, op: MockOperation) {
        let mut inner = self.inner.lock().unwrap();
        inner.operations.push(op);
    }

    fn check_fail(&self, expected: &str) -> Option<BackendError> {
        let inner = self.inner.lock().unwrap();
        match &inner.fail_on {
            Some(FailOn::Exists(e)) if expected == "exists" => Some(e.clone()),
            Some(FailOn::ListDatasets(e)) if expected == "list_datasets" => Some(e.clone()),
            Some(FailOn::ListSnapshots(e)) if expected == "list_snapshots" => Some(e.clone()),
            Some(FailOn::Diff(e)) if expected == "diff" => Some(e.clone()),
            Some(FailOn::CreateSnapshot(e)) if expected == "create_snapshot" => Some(e.clone()),
            Some(FailOn::DestroySnapshot(e)) if expected == "destroy_snapshot" => {
                Some(e.clone())
            }
            Some(FailOn::Replicate(e)) if expected == "replicate" => Some(e.clone()),
            _ => None,
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(command: String, stderr: impl Into<String>) -> BackendError {
    BackendError::CommandFailed {
        command,
        code: Some(1),
        stderr: stderr.into(),
    }
}

fn stage_failed(stage: Stage, stderr: impl Into<String>) -> BackendError {
    BackendError::StageFailed {
        stage,
        code: Some(1),
        stderr: stderr.into(),
    }
}

fn is_within(root: &DatasetId, candidate: &DatasetId) -> bool {
    candidate == root
        || candidate
            .joined()
            .strip_prefix(&root.joined())
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Map a source descendant onto the corresponding destination dataset.
fn rebase(source_root: &DatasetId, dest_root: &DatasetId, dataset: &DatasetId) -> Option<DatasetId> {
    let joined = dataset.joined();
    let suffix = joined.strip_prefix(&source_root.joined())?;
    DatasetId::parse(&format!("{}{}", dest_root.joined(), suffix)).ok()
}

impl MockBackendInner {
    fn dataset(&self, dataset: &DatasetId, command: &str) -> Result<&MockDataset, BackendError> {
        self.datasets
            .get(dataset)
            .ok_or_else(|| {
                failed(
                    format!("{command} {dataset}"),
                    format!("cannot open '{dataset}': dataset does not exist"),
                )
            })
    }

    fn tree(&self, root: &DatasetId) -> Vec<DatasetId> {
        self.datasets
            .keys()
            .filter(|d| is_within(root, d))
            .cloned()
            .collect()
    }

    /// Receive one dataset's snapshots `(base, snapshot]` (or `..=snapshot`
    /// for a full stream) from `source` into `destination`.
    fn receive_one(
        &mut self,
        source: &DatasetId,
        destination: &DatasetId,
        request: &ReplicationRequest,
        full_history: bool,
    ) -> Result<(), BackendError> {
        let src = self
            .datasets
            .get(source)
            .ok_or_else(|| {
                stage_failed(
                    Stage::Sender,
                    format!("cannot open '{source}': dataset does not exist"),
                )
            })?;
        if !src.snapshots.contains_key(&request.snapshot) {
            return Err(stage_failed(
                Stage::Sender,
                format!("snapshot '{}@{}' does not exist", source, request.snapshot),
            ));
        }

        let stream: Vec<(String, u64)> = match &request.incremental_base {
            Some(base) => {
                if !src.snapshots.contains_key(base) {
                    return Err(stage_failed(
                        Stage::Sender,
                        format!("incremental source '{source}@{base}' does not exist"),
                    ));
                }
                src.snapshots
                    .range::<String, _>((
                        std::ops::Bound::Excluded(base),
                        std::ops::Bound::Included(&request.snapshot),
                    ))
                    .map(|(n, g)| (n.clone(), *g))
                    .collect()
            }
            None if full_history => src
                .snapshots
                .range::<String, _>(..=&request.snapshot)
                .map(|(n, g)| (n.clone(), *g))
                .collect(),
            None => vec![(request.snapshot.clone(), src.snapshots[&request.snapshot])],
        };

        match &request.incremental_base {
            Some(base) => {
                let dest = self.datasets.get_mut(destination).ok_or_else(|| {
                    stage_failed(
                        Stage::Receiver,
                        format!("destination '{destination}' does not exist"),
                    )
                })?;
                if !dest.snapshots.contains_key(base) {
                    return Err(stage_failed(
                        Stage::Receiver,
                        format!("destination '{destination}' does not have snapshot '{base}'"),
                    ));
                }
                let newer: Vec<String> = dest
                    .snapshots
                    .range::<String, _>((std::ops::Bound::Excluded(base), std::ops::Bound::Unbounded))
                    .map(|(n, _)| n.clone())
                    .collect();
                if !newer.is_empty() {
                    if !request.rollback {
                        return Err(stage_failed(
                            Stage::Receiver,
                            format!(
                                "destination '{destination}' has been modified since most recent snapshot"
                            ),
                        ));
                    }
                    for name in newer {
                        dest.snapshots.remove(&name);
                    }
                }
                for (name, generation) in stream {
                    dest.snapshots.insert(name, generation);
                    dest.generation = generation;
                }
            }
            None => {
                if self.datasets.contains_key(destination) && !request.rollback {
                    return Err(stage_failed(
                        Stage::Receiver,
                        format!("destination '{destination}' exists; must specify -F to overwrite it"),
                    ));
                }
                let dest = self.datasets.entry(destination.clone()).or_default();
                dest.snapshots.clear();
                for (name, generation) in stream {
                    dest.snapshots.insert(name, generation);
                    dest.generation = generation;
                }
            }
        }
        Ok(())
    }
}

impl StorageBackend for MockBackend {
    fn exists(&self, dataset: &DatasetId) -> Result<bool, BackendError> {
        self.record(MockOperation::Exists {
            dataset: dataset.clone(),
        });
        if let Some(e) = self.check_fail("exists") {
            return Err(e);
        }
        Ok(self.has_dataset(dataset))
    }

    fn list_datasets(&self, root: &DatasetId) -> Result<Vec<DatasetId>, BackendError> {
        self.record(MockOperation::ListDatasets { root: root.clone() });
        if let Some(e) = self.check_fail("list_datasets") {
            return Err(e);
        }
        let inner = self.inner.lock().unwrap();
        inner.dataset(root, "zfs list")?;
        Ok(inner.tree(root))
    }

    fn list_snapshots(
        &self,
        dataset: &DatasetId,
        recurse: bool,
    ) -> Result<Vec<SnapshotInfo>, BackendError> {
        self.record(MockOperation::ListSnapshots {
            dataset: dataset.clone(),
            recurse,
        });
        if let Some(e) = self.check_fail("list_snapshots") {
            return Err(e);
        }

        let inner = self.inner.lock().unwrap();
        inner.dataset(dataset, "zfs list")?;
        let scope = if recurse {
            inner.tree(dataset)
        } else {
            vec![dataset.clone()]
        };

        let mut snapshots = Vec::new();
        for ds in scope {
            if let Some(data) = inner.datasets.get(&ds) {
                snapshots.extend(data.snapshots.keys().map(|name| SnapshotInfo {
                    dataset: ds.clone(),
                    name: name.clone(),
                }));
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }

    fn diff(&self, dataset: &DatasetId, a: &str, b: &str) -> Result<bool, BackendError> {
        self.record(MockOperation::Diff {
            dataset: dataset.clone(),
            a: a.to_string(),
            b: b.to_string(),
        });
        if let Some(e) = self.check_fail("diff") {
            return Err(e);
        }

        let inner = self.inner.lock().unwrap();
        let data = inner.dataset(dataset, "zfs diff")?;
        let lookup = |name: &str| {
            data.snapshots.get(name).copied().ok_or_else(|| {
                failed(
                    format!("zfs diff {dataset}@{a} {dataset}@{b}"),
                    format!("snapshot '{dataset}@{name}' does not exist"),
                )
            })
        };
        Ok(lookup(a)? != lookup(b)?)
    }

    fn create_snapshot(
        &self,
        dataset: &DatasetId,
        name: &str,
        recursive: bool,
    ) -> Result<(), BackendError> {
        self.record(MockOperation::CreateSnapshot {
            dataset: dataset.clone(),
            name: name.to_string(),
            recursive,
        });
        if let Some(e) = self.check_fail("create_snapshot") {
            return Err(e);
        }

        let mut inner = self.inner.lock().unwrap();
        if !inner.really {
            return Ok(());
        }
        let command = format!("zfs snapshot {dataset}@{name}");
        inner.dataset(dataset, "zfs snapshot")?;
        let scope = if recursive {
            inner.tree(dataset)
        } else {
            vec![dataset.clone()]
        };
        for ds in &scope {
            if inner.datasets[ds].snapshots.contains_key(name) {
                return Err(failed(
                    command,
                    format!("cannot create snapshot '{ds}@{name}': dataset already exists"),
                ));
            }
        }
        for ds in scope {
            if let Some(data) = inner.datasets.get_mut(&ds) {
                let generation = data.generation;
                data.snapshots.insert(name.to_string(), generation);
            }
        }
        Ok(())
    }

    fn destroy_snapshot(&self, dataset: &DatasetId, name: &str) -> Result<(), BackendError> {
        self.record(MockOperation::DestroySnapshot {
            dataset: dataset.clone(),
            name: name.to_string(),
        });
        if let Some(e) = self.check_fail("destroy_snapshot") {
            return Err(e);
        }

        let mut inner = self.inner.lock().unwrap();
        if !inner.really {
            return Ok(());
        }
        let removed = inner
            .datasets
            .get_mut(dataset)
            .and_then(|d| d.snapshots.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(failed(
                format!("zfs destroy {dataset}@{name}"),
                "could not find any snapshots to destroy; check snapshot names",
            )),
        }
    }

    fn replicate(&self, request: &ReplicationRequest) -> Result<(), BackendError> {
        self.record(MockOperation::Replicate(request.clone()));
        if let Some(e) = self.check_fail("replicate") {
            return Err(e);
        }

        let mut inner = self.inner.lock().unwrap();
        if !inner.really {
            return Ok(());
        }

        if !request.replicate {
            return inner.receive_one(&request.source, &request.destination, request, false);
        }

        for source in inner.tree(&request.source) {
            let Some(destination) = rebase(&request.source, &request.destination, &source) else {
                continue;
            };
            inner.receive_one(&source, &destination, request, true)?;
        }
        Ok(())
    }
}
