//! Property-based tests for retention and resolution invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::convert::Infallible;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use snapwarden::cache::RetentionCache;
use snapwarden::core::types::{snapshot_name, DatasetId};
use snapwarden::jobs::clean::plan_deletions;
use snapwarden::jobs::{Job, JobId, JobKind, JobRegistry, JobsetMember, SnapshotJob};

/// Snapshot names one hour apart starting at 2024-01-01, a random subset.
fn snapshot_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(0i64..500, 0..30).prop_map(|hours| {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        hours
            .into_iter()
            .map(|h| snapshot_name(start + Duration::hours(h)))
            .collect()
    })
}

/// Names with, per name, a keep-count and a content generation.
///
/// Generations never decrease along the list, like data written between
/// successive snapshots.
fn dataset_history() -> impl Strategy<Value = (Vec<String>, Vec<i64>, Vec<u32>)> {
    snapshot_names().prop_flat_map(|names| {
        let n = names.len();
        (
            Just(names),
            prop::collection::vec(prop_oneof![3 => Just(0i64), 1 => 1i64..3], n),
            prop::collection::vec(0u32..2, n),
        )
    })
    .prop_map(|(names, counts, steps)| {
        let generations = steps
            .iter()
            .scan(0u32, |acc, step| {
                *acc += step;
                Some(*acc)
            })
            .collect();
        (names, counts, generations)
    })
}

fn keep_until(offset_hours: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(offset_hours)
}

fn plan(
    names: &[String],
    counts: &BTreeMap<String, i64>,
    generations: &BTreeMap<String, u32>,
    until: chrono::DateTime<Utc>,
    squash: bool,
) -> Vec<String> {
    plan_deletions(
        names,
        until,
        squash,
        |name| Ok::<_, Infallible>(counts.get(name).copied().unwrap_or(0)),
        |a, b| Ok::<_, Infallible>(generations[a] != generations[b]),
    )
    .unwrap()
    .deletions
    .into_iter()
    .map(|d| d.name)
    .collect()
}

proptest! {
    /// get() after N increases and M decreases equals N - M.
    #[test]
    fn retention_counts_are_monotone(ops in prop::collection::vec(any::<bool>(), 0..40)) {
        let mut cache = RetentionCache::open_in_memory().unwrap();
        cache.migrate().unwrap();
        let ds = DatasetId::parse("tank/a").unwrap();

        let mut expected = 0i64;
        for increase in ops {
            let count = if increase {
                expected += 1;
                cache.increase(&ds, "s").unwrap()
            } else {
                expected -= 1;
                cache.decrease(&ds, "s").unwrap()
            };
            prop_assert_eq!(count, expected);
        }
        prop_assert_eq!(cache.get(&ds, "s").unwrap(), expected);
    }

    /// A snapshot with a positive keep-count is never selected.
    #[test]
    fn pinned_snapshots_are_never_deleted(
        (names, counts, generations) in dataset_history(),
        until in 0i64..600,
        squash in any::<bool>(),
    ) {
        let counts: BTreeMap<String, i64> = names.iter().cloned().zip(counts).collect();
        let generations: BTreeMap<String, u32> = names.iter().cloned().zip(generations).collect();

        let deleted = plan(&names, &counts, &generations, keep_until(until), squash);
        for name in &deleted {
            prop_assert_eq!(counts[name], 0, "{} is pinned", name);
        }
        let unique: HashSet<&String> = deleted.iter().collect();
        prop_assert_eq!(unique.len(), deleted.len());
    }

    /// A second squash pass with no new snapshots deletes nothing.
    #[test]
    fn squash_is_idempotent(
        (names, counts, generations) in dataset_history(),
        until in 0i64..600,
    ) {
        let counts: BTreeMap<String, i64> = names.iter().cloned().zip(counts).collect();
        let generations: BTreeMap<String, u32> = names.iter().cloned().zip(generations).collect();
        let until = keep_until(until);

        let first: HashSet<String> = plan(&names, &counts, &generations, until, true)
            .into_iter()
            .collect();
        let remaining: Vec<String> = names.into_iter().filter(|n| !first.contains(n)).collect();

        let second = plan(&remaining, &counts, &generations, until, true);
        prop_assert!(second.is_empty(), "second pass deleted {:?}", second);
    }

    /// Acyclic jobset graphs resolve to every reachable job.
    #[test]
    fn acyclic_jobsets_resolve_completely(
        edges in prop::collection::vec(
            (prop::collection::vec(0usize..8, 0..4), prop::collection::vec(0usize..6, 0..4)),
            1..8,
        ),
        root in 0usize..8,
    ) {
        let (registry, ids) = build_registry(&edges, |set, nested| nested < set);
        let root = root % edges.len();

        let resolution = registry.resolve(&[format!("set{root}")], None);
        let expected = reachable(&edges, &ids, root, |set, nested| nested < set);
        let got: BTreeSet<JobId> = resolution.jobs.iter().copied().collect();
        prop_assert_eq!(got, expected);
    }

    /// Arbitrary jobset graphs, cycles included, resolve in finite time.
    #[test]
    fn cyclic_jobsets_terminate(
        edges in prop::collection::vec(
            (prop::collection::vec(0usize..8, 0..4), prop::collection::vec(0usize..6, 0..4)),
            1..8,
        ),
    ) {
        let (registry, ids) = build_registry(&edges, |_, _| true);
        let resolution = registry.resolve(&["all-jobsets".to_string()], None);
        let expected: BTreeSet<JobId> = (0..edges.len())
            .flat_map(|set| reachable(&edges, &ids, set, |_, _| true))
            .collect();
        let got: BTreeSet<JobId> = resolution.jobs.iter().copied().collect();
        prop_assert_eq!(got, expected);
    }
}

/// Jobsets `set0..setN` over six snapshot jobs; `keep` filters nested edges.
fn build_registry(
    edges: &[(Vec<usize>, Vec<usize>)],
    keep: impl Fn(usize, usize) -> bool,
) -> (JobRegistry, Vec<JobId>) {
    let mut registry = JobRegistry::new();
    let ids: Vec<JobId> = (0..6)
        .map(|i| {
            registry.add_job(Job::new(
                format!("job{i}"),
                true,
                JobKind::Snapshot(SnapshotJob {
                    target: DatasetId::parse("tank").unwrap(),
                    recursive: false,
                }),
            ))
        })
        .collect();

    for (set, (nested, jobs)) in edges.iter().enumerate() {
        let mut members: Vec<JobsetMember> = jobs.iter().map(|j| JobsetMember::Job(ids[*j])).collect();
        members.extend(
            nested
                .iter()
                .map(|n| n % edges.len())
                .filter(|n| keep(set, *n))
                .map(|n| JobsetMember::Jobset(format!("set{n}"))),
        );
        registry.add_jobset(format!("set{set}"), members);
    }
    (registry, ids)
}

fn reachable(
    edges: &[(Vec<usize>, Vec<usize>)],
    ids: &[JobId],
    root: usize,
    keep: impl Fn(usize, usize) -> bool,
) -> BTreeSet<JobId> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![root];
    let mut jobs = BTreeSet::new();
    while let Some(set) = stack.pop() {
        if !seen.insert(set) {
            continue;
        }
        let (nested, members) = &edges[set];
        jobs.extend(members.iter().map(|j| ids[*j]));
        stack.extend(
            nested
                .iter()
                .map(|n| n % edges.len())
                .filter(|n| keep(set, *n)),
        );
    }
    jobs
}
