//! jobs::clean
//!
//! Retention sweep: expire old snapshots and squash identical neighbours.
//!
//! # Algorithm
//!
//! Snapshots of one dataset are walked in name order (names encode creation
//! time, so this is chronological) while tracking the last survivor:
//!
//! 1. A snapshot with a positive keep-count is left alone and does not
//!    become the survivor
//! 2. A snapshot older than `now - retention` is deleted
//! 3. With squash enabled, if the survivor and the current snapshot have
//!    identical content, the survivor is deleted
//! 4. The current snapshot becomes the survivor
//!
//! Names that are not snapwarden timestamps are never deleted.
//!
//! # Invariants
//!
//! - The whole per-dataset scan finishes before the first destroy
//! - Listing, deciding and destroying all happen under the pool lock
//! - A lock timeout skips that dataset only; the others are still cleaned

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{ExistsMemo, JobError};
use crate::core::types::{parse_snapshot_time, DatasetId, Retention};
use crate::engine::{Context, Services};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanJob {
    pub target: DatasetId,
    pub retention: Retention,
    pub squash: bool,
    pub recurse: bool,
}

/// Why a snapshot was selected for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteReason {
    /// Older than the retention window.
    Expired,
    /// Identical to the named, newer snapshot.
    SameAs(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub name: String,
    pub reason: DeleteReason,
}

/// Decisions for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPlan {
    pub deletions: Vec<Deletion>,
    /// Snapshots skipped because of a positive keep-count.
    pub protected: Vec<String>,
}

impl CleanPlan {
    pub fn deleted_names(&self) -> Vec<&str> {
        self.deletions.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Decide which of `names` (ascending) to delete.
///
/// `keep_count` and `differs` are consulted lazily, in walk order, so
/// callers can back them with the retention cache and the backend.
pub fn plan_deletions<E>(
    names: &[String],
    keep_until: DateTime<Utc>,
    squash: bool,
    mut keep_count: impl FnMut(&str) -> Result<i64, E>,
    mut differs: impl FnMut(&str, &str) -> Result<bool, E>,
) -> Result<CleanPlan, E> {
    let mut plan = CleanPlan::default();
    let mut survivor: Option<&str> = None;

    for name in names {
        let count = keep_count(name.as_str())?;
        if count > 0 {
            debug!(snapshot = %name, count, "protected by keep-count");
            plan.protected.push(name.clone());
            continue;
        }

        let Some(created) = parse_snapshot_time(name) else {
            debug!(snapshot = %name, "not a timestamped snapshot, leaving it alone");
            continue;
        };

        if created < keep_until {
            plan.deletions.push(Deletion {
                name: name.clone(),
                reason: DeleteReason::Expired,
            });
            continue;
        }

        if !squash {
            continue;
        }
        if let Some(previous) = survivor {
            if !differs(previous, name.as_str())? {
                plan.deletions.push(Deletion {
                    name: previous.to_string(),
                    reason: DeleteReason::SameAs(name.clone()),
                });
            }
        }
        survivor = Some(name);
    }

    Ok(plan)
}

/// Result of cleaning one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetClean {
    pub dataset: DatasetId,
    pub plan: CleanPlan,
    /// True when the pool lock timed out and nothing was done.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// True when the target dataset does not exist.
    pub missing: bool,
    pub datasets: Vec<DatasetClean>,
}

impl CleanReport {
    /// Number of snapshots destroyed (or that would be, in a dry run).
    pub fn destroyed(&self) -> usize {
        self.datasets.iter().map(|d| d.plan.deletions.len()).sum()
    }
}

impl CleanJob {
    pub(super) fn run(
        &self,
        exists: &ExistsMemo,
        ctx: &Context,
        services: &Services<'_>,
    ) -> Result<CleanReport, JobError> {
        info!(dataset = %self.target, retention = %self.retention, "cleaning snapshots");

        if !exists.check(services.backend, &self.target)? {
            warn!(dataset = %self.target, "dataset does not exist, nothing to clean");
            return Ok(CleanReport {
                missing: true,
                datasets: Vec::new(),
            });
        }

        let keep_until = self.retention.keep_until(ctx.now)?;
        let datasets = if self.recurse {
            services.backend.list_datasets(&self.target)?
        } else {
            vec![self.target.clone()]
        };

        let mut report = CleanReport::default();
        for dataset in datasets {
            match self.clean_dataset(&dataset, keep_until, services) {
                Ok(plan) => report.datasets.push(DatasetClean {
                    dataset,
                    plan,
                    skipped: false,
                }),
                Err(e) if e.is_lock_timeout() => {
                    warn!(dataset = %dataset, error = %e, "skipping dataset");
                    report.datasets.push(DatasetClean {
                        dataset,
                        plan: CleanPlan::default(),
                        skipped: true,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    fn clean_dataset(
        &self,
        dataset: &DatasetId,
        keep_until: DateTime<Utc>,
        services: &Services<'_>,
    ) -> Result<CleanPlan, JobError> {
        let _lock = services
            .locks
            .acquire(dataset.pool(), services.lock_timeout)?;

        let names: Vec<String> = services
            .backend
            .list_snapshots(dataset, false)?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let plan = plan_deletions(
            &names,
            keep_until,
            self.squash,
            |name| self.keep_count(dataset, name, services),
            |a, b| Ok(services.backend.diff(dataset, a, b)?),
        )?;

        for deletion in &plan.deletions {
            match &deletion.reason {
                DeleteReason::Expired => {
                    info!(snapshot = %dataset.snapshot(deletion.name.as_str()), "destroying: too old")
                }
                DeleteReason::SameAs(newer) => info!(
                    snapshot = %dataset.snapshot(deletion.name.as_str()),
                    same_as = %newer,
                    "destroying: identical to newer snapshot"
                ),
            }
            services.backend.destroy_snapshot(dataset, &deletion.name)?;
        }

        Ok(plan)
    }

    /// Keep-count of a snapshot; descendants are also protected by the
    /// target's count for the same name.
    fn keep_count(
        &self,
        dataset: &DatasetId,
        name: &str,
        services: &Services<'_>,
    ) -> Result<i64, JobError> {
        let own = services.cache.get(dataset, name)?;
        if dataset == &self.target {
            return Ok(own);
        }
        Ok(own.max(services.cache.get(&self.target, name)?))
    }
}
