//! jobs::snapshot
//!
//! Create one timestamped snapshot of a dataset.
//!
//! Sequence: `before_snapshot` hook, existence check, create under the pool
//! lock, `after_snapshot` hook. A failing before-hook aborts the job; a
//! failing after-hook is reported but the snapshot stays.

use std::collections::BTreeMap;

use tracing::{error, info};

use super::{ExistsMemo, JobError};
use crate::core::types::{snapshot_name, DatasetId, SnapshotRef};
use crate::engine::{Context, Services};

pub const BEFORE_SNAPSHOT: &str = "before_snapshot";
pub const AFTER_SNAPSHOT: &str = "after_snapshot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotJob {
    pub target: DatasetId,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub snapshot: SnapshotRef,
    /// Exit status of the `after_snapshot` hook; non-zero was logged.
    pub after_hook_status: i32,
}

impl SnapshotJob {
    pub(super) fn run(
        &self,
        exists: &ExistsMemo,
        ctx: &Context,
        services: &Services<'_>,
    ) -> Result<SnapshotOutcome, JobError> {
        info!(dataset = %self.target, "taking snapshot");
        let hook_context = BTreeMap::from([("dataset".to_string(), self.target.joined())]);

        let status = services.hooks.run(BEFORE_SNAPSHOT, &hook_context)?;
        if status != 0 {
            return Err(JobError::HookFailed {
                event: BEFORE_SNAPSHOT.to_string(),
                status,
            });
        }

        if !exists.check(services.backend, &self.target)? {
            return Err(JobError::DatasetMissing(self.target.clone()));
        }

        let name = snapshot_name(ctx.now);
        {
            let _lock = services
                .locks
                .acquire(self.target.pool(), services.lock_timeout)?;
            services
                .backend
                .create_snapshot(&self.target, &name, self.recursive)?;
        }

        let after_hook_status = match services.hooks.run(AFTER_SNAPSHOT, &hook_context) {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "after_snapshot hook could not run");
                -1
            }
        };
        if after_hook_status != 0 {
            error!(
                status = after_hook_status,
                "after_snapshot hook failed; keeping snapshot"
            );
        }

        Ok(SnapshotOutcome {
            snapshot: self.target.snapshot(name),
            after_hook_status,
        })
    }
}
