//! engine::runner
//!
//! Batch runner: executes resolved jobs one after another and records what
//! happened to each.
//!
//! # Invariants
//!
//! - Every job in the input appears exactly once in the report, in order
//! - Per-job errors are logged at error level with the underlying
//!   diagnostics and recorded as [`JobStatus::Failed`]
//! - Lock timeouts are logged at warn level and recorded as
//!   [`JobStatus::Skipped`]

use tracing::{error, info, warn};

use super::{Context, Services};
use crate::jobs::{JobId, JobOutcome, JobRegistry};

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded(JobOutcome),
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// `type.name` of the job.
    pub job: String,
    pub status: JobStatus,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<JobResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Succeeded(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&JobStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}

/// Run each job in `ids`, in order.
pub fn run_batch(
    registry: &JobRegistry,
    ids: &[JobId],
    ctx: &Context,
    services: &Services<'_>,
) -> BatchReport {
    let mut report = BatchReport::default();

    for id in ids {
        let job = registry.job(*id);
        let label = job.qualified_name();

        let status = match job.run(ctx, services) {
            Ok(JobOutcome::Disabled) => {
                info!(job = %label, "disabled, skipping");
                JobStatus::Succeeded(JobOutcome::Disabled)
            }
            Ok(outcome) => {
                info!(job = %label, "{}", outcome);
                JobStatus::Succeeded(outcome)
            }
            Err(e) if e.is_lock_timeout() => {
                warn!(job = %label, error = %e, "skipped");
                JobStatus::Skipped(e.to_string())
            }
            Err(e) => {
                error!(job = %label, error = %e, "failed");
                JobStatus::Failed(e.to_string())
            }
        };

        report.results.push(JobResult { job: label, status });
    }

    if !report.results.is_empty() {
        info!(
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "batch finished"
        );
    }
    report
}
