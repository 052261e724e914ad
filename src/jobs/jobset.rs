//! jobs::jobset
//!
//! Job registry and jobset resolution.
//!
//! # Architecture
//!
//! [`JobRegistry`] is an arena: jobs live in one vector and are referred to
//! by [`JobId`]; jobsets map a name to an ordered member list of job ids and
//! nested jobset names. The registry is built once from validated
//! configuration and never changes afterwards.
//!
//! # Resolution
//!
//! [`JobRegistry::resolve`] turns requested names into an ordered list of
//! job ids:
//!
//! - Each requested name is consumed on first match; repeating a name in one
//!   request has no further effect
//! - `all` selects every job of the filtered type; `all-jobsets` expands
//!   every jobset. Either token makes the rest of the request irrelevant
//! - A jobset name wins over a job of the same name
//! - Jobs reachable through several nested jobsets are listed once per path
//! - A jobset already being expanded on the current path is not entered
//!   again, so cyclic definitions terminate
//! - Names that match nothing are returned in [`Resolution::unmatched`]
//!
//! # Example
//!
//! ```ignore
//! let resolution = registry.resolve(&["nightly".into()], Some(JobType::Clean));
//! for id in &resolution.jobs {
//!     registry.job(*id).run(&ctx, &services)?;
//! }
//! ```

use std::collections::BTreeMap;

use tracing::warn;

use super::{Job, JobType};

/// Selects every job of the requested type.
pub const ALL: &str = "all";
/// Expands every jobset.
pub const ALL_JOBSETS: &str = "all-jobsets";
/// Short form of [`ALL_JOBSETS`].
pub const ALL_JOBSETS_SHORT: &str = "all-js";

/// Index of a job in a [`JobRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(usize);

/// One entry of a jobset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobsetMember {
    Job(JobId),
    Jobset(String),
}

/// Result of resolving a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub jobs: Vec<JobId>,
    pub unmatched: Vec<String>,
}

/// Immutable set of configured jobs and jobsets.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Vec<Job>,
    jobsets: BTreeMap<String, Vec<JobsetMember>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, returning its id.
    pub fn add_job(&mut self, job: Job) -> JobId {
        self.jobs.push(job);
        JobId(self.jobs.len() - 1)
    }

    /// Define (or replace) a jobset.
    pub fn add_jobset(&mut self, name: impl Into<String>, members: Vec<JobsetMember>) {
        self.jobsets.insert(name.into(), members);
    }

    /// Look up a job.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this registry.
    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.0]
    }

    /// All jobs with their ids, in definition order.
    pub fn jobs(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs.iter().enumerate().map(|(i, job)| (JobId(i), job))
    }

    /// Jobs of one type, in definition order.
    pub fn jobs_of(&self, ty: JobType) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs().filter(move |(_, job)| job.job_type() == ty)
    }

    /// Find a job by type and name.
    pub fn find(&self, ty: JobType, name: &str) -> Option<JobId> {
        self.jobs_of(ty)
            .find(|(_, job)| job.name == name)
            .map(|(id, _)| id)
    }

    pub fn jobset(&self, name: &str) -> Option<&[JobsetMember]> {
        self.jobsets.get(name).map(Vec::as_slice)
    }

    /// All jobsets, ordered by name.
    pub fn jobsets(&self) -> impl Iterator<Item = (&str, &[JobsetMember])> {
        self.jobsets
            .iter()
            .map(|(name, members)| (name.as_str(), members.as_slice()))
    }

    /// `type.name` or `jobset.name`, as written in configuration.
    pub fn member_label(&self, member: &JobsetMember) -> String {
        match member {
            JobsetMember::Job(id) => self.job(*id).qualified_name(),
            JobsetMember::Jobset(name) => format!("jobset.{name}"),
        }
    }

    /// Resolve requested job and jobset names.
    ///
    /// With `filter`, only jobs of that type are selected and plain names
    /// may refer to jobs; without it (the `jobset` action), plain names may
    /// only refer to jobsets and `all` expands every jobset.
    ///
    /// Expansion only refuses a jobset already on the current path, so a
    /// jobset reachable along several paths is expanded once per path and
    /// its jobs repeat. Densely cross-linked jobsets therefore expand
    /// combinatorially: nine jobsets that all include each other yield
    /// one job over a hundred thousand times.
    pub fn resolve(&self, names: &[String], filter: Option<JobType>) -> Resolution {
        let mut worklist: Vec<&str> = Vec::with_capacity(names.len());
        for name in names {
            if !worklist.contains(&name.as_str()) {
                worklist.push(name.as_str());
            }
        }

        let mut resolution = Resolution::default();
        let wants_all = worklist.contains(&ALL);
        let wants_all_jobsets = worklist
            .iter()
            .any(|n| *n == ALL_JOBSETS || *n == ALL_JOBSETS_SHORT);

        if wants_all || wants_all_jobsets {
            if let (true, Some(ty)) = (wants_all, filter) {
                resolution.jobs.extend(self.jobs_of(ty).map(|(id, _)| id));
            }
            if wants_all_jobsets || (wants_all && filter.is_none()) {
                for name in self.jobsets.keys() {
                    self.expand(name, filter, &mut Vec::new(), &mut resolution.jobs);
                }
            }
            return resolution;
        }

        for name in worklist {
            if self.jobsets.contains_key(name) {
                self.expand(name, filter, &mut Vec::new(), &mut resolution.jobs);
                continue;
            }
            match filter.and_then(|ty| self.find(ty, name)) {
                Some(id) => resolution.jobs.push(id),
                None => resolution.unmatched.push(name.to_string()),
            }
        }

        if !resolution.unmatched.is_empty() {
            let scope = filter.map_or("jobset", |ty| ty.as_str());
            warn!(
                "unmatched {} names: {}",
                scope,
                resolution.unmatched.join(", ")
            );
        }
        resolution
    }

    fn expand<'a>(
        &'a self,
        name: &'a str,
        filter: Option<JobType>,
        path: &mut Vec<&'a str>,
        out: &mut Vec<JobId>,
    ) {
        if path.contains(&name) {
            warn!(jobset = name, path = %path.join(" -> "), "jobset cycle, not expanding again");
            return;
        }
        let Some(members) = self.jobsets.get(name) else {
            return;
        };

        path.push(name);
        for member in members {
            match member {
                JobsetMember::Job(id) => {
                    if filter.map_or(true, |ty| self.job(*id).job_type() == ty) {
                        out.push(*id);
                    }
                }
                JobsetMember::Jobset(nested) => self.expand(nested, filter, path, out),
            }
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DatasetId;
    use crate::jobs::{JobKind, SnapshotJob};

    fn snapshot_job(name: &str) -> Job {
        Job::new(
            name,
            true,
            JobKind::Snapshot(SnapshotJob {
                target: DatasetId::parse("tank").unwrap(),
                recursive: false,
            }),
        )
    }

    fn clean_job(name: &str) -> Job {
        use crate::core::types::Retention;
        use crate::jobs::CleanJob;
        Job::new(
            name,
            true,
            JobKind::Clean(CleanJob {
                target: DatasetId::parse("tank").unwrap(),
                retention: Retention::default(),
                squash: false,
                recurse: false,
            }),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn labels(registry: &JobRegistry, ids: &[JobId]) -> Vec<String> {
        ids.iter().map(|id| registry.job(*id).qualified_name()).collect()
    }

    fn registry() -> JobRegistry {
        let mut reg = JobRegistry::new();
        let home = reg.add_job(snapshot_job("home"));
        let var = reg.add_job(snapshot_job("var"));
        let clean_home = reg.add_job(clean_job("home"));
        reg.add_jobset(
            "nightly",
            vec![
                JobsetMember::Job(home),
                JobsetMember::Job(clean_home),
                JobsetMember::Jobset("weekly".into()),
            ],
        );
        reg.add_jobset("weekly", vec![JobsetMember::Job(var)]);
        reg
    }

    #[test]
    fn plain_job_names_filter_by_type() {
        let reg = registry();
        let res = reg.resolve(&names(&["home"]), Some(JobType::Clean));
        assert_eq!(labels(&reg, &res.jobs), vec!["clean.home"]);
        assert!(res.unmatched.is_empty());
    }

    #[test]
    fn all_selects_every_job_of_type() {
        let reg = registry();
        let res = reg.resolve(&names(&["all", "bogus"]), Some(JobType::Snapshot));
        assert_eq!(labels(&reg, &res.jobs), vec!["snapshot.home", "snapshot.var"]);
        assert!(res.unmatched.is_empty());
    }

    #[test]
    fn nested_jobsets_expand_in_order() {
        let reg = registry();
        let res = reg.resolve(&names(&["nightly"]), Some(JobType::Snapshot));
        assert_eq!(labels(&reg, &res.jobs), vec!["snapshot.home", "snapshot.var"]);

        let res = reg.resolve(&names(&["nightly"]), None);
        assert_eq!(
            labels(&reg, &res.jobs),
            vec!["snapshot.home", "clean.home", "snapshot.var"]
        );
    }

    #[test]
    fn repeated_name_is_consumed_once() {
        let reg = registry();
        let res = reg.resolve(&names(&["home", "home"]), Some(JobType::Snapshot));
        assert_eq!(res.jobs.len(), 1);
    }

    #[test]
    fn unmatched_names_are_reported() {
        let reg = registry();
        let res = reg.resolve(&names(&["home", "nope", "other"]), Some(JobType::Snapshot));
        assert_eq!(res.jobs.len(), 1);
        assert_eq!(res.unmatched, vec!["nope", "other"]);
    }

    #[test]
    fn jobset_action_ignores_plain_jobs() {
        let reg = registry();
        let res = reg.resolve(&names(&["home"]), None);
        assert!(res.jobs.is_empty());
        assert_eq!(res.unmatched, vec!["home"]);
    }

    #[test]
    fn diamond_paths_run_twice() {
        let mut reg = registry();
        reg.add_jobset(
            "both",
            vec![
                JobsetMember::Jobset("weekly".into()),
                JobsetMember::Jobset("weekly".into()),
            ],
        );
        let res = reg.resolve(&names(&["both"]), None);
        assert_eq!(labels(&reg, &res.jobs), vec!["snapshot.var", "snapshot.var"]);
    }

    #[test]
    fn self_reference_terminates() {
        let mut reg = registry();
        let home = reg.find(JobType::Snapshot, "home").unwrap();
        reg.add_jobset(
            "loop",
            vec![JobsetMember::Job(home), JobsetMember::Jobset("loop".into())],
        );
        let res = reg.resolve(&names(&["loop"]), None);
        assert_eq!(labels(&reg, &res.jobs), vec!["snapshot.home"]);
    }

    #[test]
    fn indirect_cycle_terminates() {
        let mut reg = registry();
        let home = reg.find(JobType::Snapshot, "home").unwrap();
        reg.add_jobset(
            "a",
            vec![JobsetMember::Job(home), JobsetMember::Jobset("b".into())],
        );
        reg.add_jobset("b", vec![JobsetMember::Jobset("a".into())]);
        let res = reg.resolve(&names(&["a"]), None);
        assert_eq!(labels(&reg, &res.jobs), vec!["snapshot.home"]);
    }

    #[test]
    fn cross_linked_jobsets_expand_once_per_path() {
        let mut reg = JobRegistry::new();
        let ids: Vec<JobId> = ["a", "b", "c"]
            .iter()
            .map(|n| reg.add_job(snapshot_job(n)))
            .collect();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let mut members = vec![JobsetMember::Job(ids[i])];
            members.extend(
                ["a", "b", "c"]
                    .iter()
                    .filter(|other| *other != name)
                    .map(|other| JobsetMember::Jobset(other.to_string())),
            );
            reg.add_jobset(*name, members);
        }

        let res = reg.resolve(&names(&["a"]), None);
        assert_eq!(
            labels(&reg, &res.jobs),
            vec!["snapshot.a", "snapshot.b", "snapshot.c", "snapshot.c", "snapshot.b"]
        );
    }

    #[test]
    fn all_jobsets_applies_type_filter() {
        let reg = registry();
        let res = reg.resolve(&names(&["all-js"]), Some(JobType::Clean));
        assert_eq!(labels(&reg, &res.jobs), vec!["clean.home"]);
    }

    #[test]
    fn member_labels() {
        let reg = registry();
        let members = reg.jobset("nightly").unwrap();
        let rendered: Vec<_> = members.iter().map(|m| reg.member_label(m)).collect();
        assert_eq!(rendered, vec!["snapshot.home", "clean.home", "jobset.weekly"]);
    }
}
