//! jobs::copy
//!
//! Replicate the latest source snapshot to a destination dataset.
//!
//! # Protocol
//!
//! 1. Pick the latest source snapshot; with `incremental`, use the
//!    destination's latest snapshot as base when the source still has it,
//!    otherwise fall back to a full send
//! 2. Increase the keep-count of the sent snapshot on both sides
//! 3. Take the source and destination pool locks
//! 4. Send/receive
//! 5. On success, decrease the keep-count of the base on both sides; on
//!    failure (or lock timeout), decrease what step 2 increased
//!
//! The sent snapshot keeps its count after success: it is the anchor of the
//! next incremental run, and clean jobs must not remove it until a newer
//! one takes over.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use super::{ExistsMemo, JobError};
use crate::backend::ReplicationRequest;
use crate::cache::{CacheError, RetentionCache};
use crate::core::types::{DatasetId, SnapshotRef};
use crate::engine::Services;

/// Receiving side of a copy job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub dataset: DatasetId,
    /// A missing destination is created by the receiver.
    pub create: bool,
    /// Roll back destination changes before receiving.
    pub rollback: bool,
    pub property_overwrites: BTreeMap<String, String>,
    pub property_ignores: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub source: DatasetId,
    pub destination: Destination,
    pub replicate: bool,
    pub incremental: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The destination already holds the latest source snapshot.
    InSync { snapshot: SnapshotRef },
    Sent {
        snapshot: SnapshotRef,
        base: Option<String>,
    },
}

/// Increase keep-counts for every key, undoing partial progress on error.
fn protect(cache: &RetentionCache, keys: &[(&DatasetId, &str)]) -> Result<(), CacheError> {
    for (done, (dataset, snapshot)) in keys.iter().enumerate() {
        if let Err(e) = cache.increase(dataset, snapshot) {
            release(cache, &keys[..done]);
            return Err(e);
        }
    }
    Ok(())
}

/// Decrease keep-counts; failures are logged since the caller is already
/// on its way out.
fn release(cache: &RetentionCache, keys: &[(&DatasetId, &str)]) {
    for (dataset, snapshot) in keys {
        if let Err(e) = cache.decrease(dataset, snapshot) {
            error!(
                dataset = %dataset,
                snapshot = %snapshot,
                error = %e,
                "failed to release keep-count"
            );
        }
    }
}

impl CopyJob {
    pub(super) fn run(
        &self,
        exists: &ExistsMemo,
        services: &Services<'_>,
    ) -> Result<CopyOutcome, JobError> {
        let source = &self.source;
        let destination = &self.destination.dataset;
        info!(source = %source, destination = %destination, "copying snapshots");

        if !exists.check(services.backend, source)? {
            return Err(JobError::DatasetMissing(source.clone()));
        }
        let destination_exists = exists.check(services.backend, destination)?;
        if !destination_exists && !self.destination.create {
            return Err(JobError::DatasetMissing(destination.clone()));
        }

        let source_names: Vec<String> = services
            .backend
            .list_snapshots(source, false)?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let Some(latest) = source_names.last().cloned() else {
            return Err(JobError::NoSourceSnapshots(source.clone()));
        };

        let destination_latest = if destination_exists {
            services
                .backend
                .list_snapshots(destination, false)?
                .pop()
                .map(|s| s.name)
        } else {
            None
        };

        if destination_latest.as_deref() == Some(latest.as_str()) {
            info!(snapshot = %latest, "destination already in sync");
            return Ok(CopyOutcome::InSync {
                snapshot: source.snapshot(latest),
            });
        }

        let base = if !self.incremental {
            None
        } else {
            match destination_latest {
                None => {
                    info!(destination = %destination, "destination has no snapshots, sending in full");
                    None
                }
                Some(candidate) if source_names.contains(&candidate) => Some(candidate),
                Some(candidate) => {
                    warn!(
                        destination = %destination,
                        snapshot = %candidate,
                        "destination's latest snapshot is missing on the source, sending in full"
                    );
                    None
                }
            }
        };

        let sent = [(source, latest.as_str()), (destination, latest.as_str())];
        protect(services.cache, &sent)?;

        let locks = match services.locks.acquire_all(
            &[source.pool(), destination.pool()],
            services.lock_timeout,
        ) {
            Ok(locks) => locks,
            Err(e) => {
                release(services.cache, &sent);
                return Err(e.into());
            }
        };

        let request = ReplicationRequest {
            source: source.clone(),
            snapshot: latest.clone(),
            destination: destination.clone(),
            incremental_base: base.clone(),
            replicate: self.replicate,
            rollback: self.destination.rollback,
            property_overwrites: self.destination.property_overwrites.clone(),
            property_ignores: self.destination.property_ignores.clone(),
        };

        let result = services.backend.replicate(&request);
        drop(locks);

        if let Err(source_err) = result {
            release(services.cache, &sent);
            return Err(JobError::Replication {
                snapshot: source.snapshot(latest),
                destination: destination.clone(),
                source: source_err,
            });
        }

        if let Some(base) = &base {
            release(services.cache, &[(source, base.as_str()), (destination, base.as_str())]);
        }

        info!(snapshot = %source.snapshot(latest.as_str()), base = ?base, "replication finished");
        Ok(CopyOutcome::Sent {
            snapshot: source.snapshot(latest),
            base,
        })
    }
}
