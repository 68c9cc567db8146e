//! Benchmark and test case versioning.
//!
//! A benchmark's version only moves when the *set* of test case ids changes;
//! renames, description edits and pure reorderings keep the current version.
//! Runs capture `benchmark_version` plus one [`TestCaseSnapshot`] per test
//! case so historical runs keep their meaning after later edits.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::types::{
    Benchmark, BenchmarkRun, BenchmarkVersion, RunStatus, TestCase, TestCaseResult,
    TestCaseSnapshot,
};
use crate::report::TrajectoryStep;

/// Errors raised while versioning benchmarks or creating runs.
#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("Test case '{0}' does not exist")]
    UnknownTestCase(String),

    #[error("Benchmark '{0}' lists test case '{1}' more than once")]
    DuplicateTestCase(String, String),
}

/// Partial edit of a benchmark definition.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub test_case_ids: Option<Vec<String>>,
}

/// Partial edit of a test case definition.
#[derive(Debug, Clone, Default)]
pub struct TestCaseUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub prompt: Option<String>,
    pub context: Option<Vec<String>>,
    pub expected_outcomes: Option<Vec<String>>,
    pub expected_trajectory: Option<Vec<TrajectoryStep>>,
}

/// Creates a benchmark at version 1.
pub fn new_benchmark(
    name: impl Into<String>,
    description: Option<String>,
    test_case_ids: Vec<String>,
) -> Result<Benchmark, VersioningError> {
    let id = format!("bench-{}", Uuid::new_v4());
    ensure_unique(&id, &test_case_ids)?;

    let now = Utc::now();
    Ok(Benchmark {
        id,
        name: name.into(),
        description,
        versions: vec![BenchmarkVersion {
            version: 1,
            created_at: now,
            test_case_ids: test_case_ids.clone(),
        }],
        test_case_ids,
        current_version: 1,
        runs: Vec::new(),
        created_at: now,
        updated_at: now,
    })
}

/// Returns true when `old` and `new` contain different test case ids,
/// ignoring order.
pub fn test_case_set_changed(old: &[String], new: &[String]) -> bool {
    let old: HashSet<&str> = old.iter().map(String::as_str).collect();
    let new: HashSet<&str> = new.iter().map(String::as_str).collect();
    old != new
}

/// Applies `update` to `benchmark`, appending a new version when the
/// test case membership changes.
///
/// Returns `true` if a new version was created.
pub fn apply_benchmark_update(
    benchmark: &mut Benchmark,
    update: BenchmarkUpdate,
) -> Result<bool, VersioningError> {
    let now = Utc::now();

    if let Some(name) = update.name {
        benchmark.name = name;
    }
    if let Some(description) = update.description {
        benchmark.description = Some(description);
    }

    let mut bumped = false;
    if let Some(ids) = update.test_case_ids {
        ensure_unique(&benchmark.id, &ids)?;
        if test_case_set_changed(&benchmark.test_case_ids, &ids) {
            let next = benchmark.current_version + 1;
            benchmark.versions.push(BenchmarkVersion {
                version: next,
                created_at: now,
                test_case_ids: ids.clone(),
            });
            benchmark.current_version = next;
            bumped = true;
        }
        benchmark.test_case_ids = ids;
    }

    benchmark.updated_at = now;
    Ok(bumped)
}

/// Applies `update` to `test_case`, bumping its version when anything that
/// affects evaluation changes.
///
/// Returns `true` if the version was bumped.
pub fn apply_test_case_update(test_case: &mut TestCase, update: TestCaseUpdate) -> bool {
    let mut content_changed = false;

    if let Some(name) = update.name {
        test_case.name = name;
    }
    if let Some(description) = update.description {
        test_case.description = Some(description);
    }
    if let Some(prompt) = update.prompt {
        content_changed |= prompt != test_case.prompt;
        test_case.prompt = prompt;
    }
    if let Some(context) = update.context {
        content_changed |= context != test_case.context;
        test_case.context = context;
    }
    if let Some(outcomes) = update.expected_outcomes {
        content_changed |= outcomes != test_case.expected_outcomes;
        test_case.expected_outcomes = outcomes;
    }
    if let Some(trajectory) = update.expected_trajectory {
        content_changed |= test_case.expected_trajectory.as_ref() != Some(&trajectory);
        test_case.expected_trajectory = Some(trajectory);
    }

    if content_changed {
        test_case.version += 1;
    }
    test_case.updated_at = Utc::now();
    content_changed
}

/// Snapshots the test cases listed by `benchmark`, in benchmark order.
pub fn snapshot_test_cases(
    benchmark: &Benchmark,
    test_cases: &HashMap<String, TestCase>,
) -> Result<Vec<TestCaseSnapshot>, VersioningError> {
    benchmark
        .test_case_ids
        .iter()
        .map(|id| {
            test_cases
                .get(id)
                .map(TestCase::snapshot)
                .ok_or_else(|| VersioningError::UnknownTestCase(id.clone()))
        })
        .collect()
}

/// Creates a new `running` run pinned to the benchmark's current version.
///
/// Every test case starts with a `pending` result placeholder.
pub fn new_run(
    benchmark: &Benchmark,
    agent_key: impl Into<String>,
    model_id: impl Into<String>,
    snapshots: Vec<TestCaseSnapshot>,
    name: Option<String>,
) -> BenchmarkRun {
    let results: BTreeMap<String, TestCaseResult> = benchmark
        .test_case_ids
        .iter()
        .map(|id| (id.clone(), TestCaseResult::pending()))
        .collect();

    BenchmarkRun {
        id: format!("run-{}", Uuid::new_v4()),
        name,
        created_at: Utc::now(),
        completed_at: None,
        agent_key: agent_key.into(),
        model_id: model_id.into(),
        status: RunStatus::Running,
        benchmark_version: benchmark.current_version,
        test_case_snapshots: snapshots,
        results,
        stats: None,
        error: None,
    }
}

fn ensure_unique(benchmark_id: &str, ids: &[String]) -> Result<(), VersioningError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(VersioningError::DuplicateTestCase(
                benchmark_id.to_string(),
                id.clone(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_benchmark_starts_at_version_one() {
        let b = new_benchmark("Support", None, ids(&["a", "b"])).expect("valid");
        assert_eq!(b.current_version, 1);
        assert_eq!(b.versions.len(), 1);
        assert_eq!(b.versions[0].test_case_ids, ids(&["a", "b"]));
        assert!(b.runs.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = new_benchmark("Dup", None, ids(&["a", "a"])).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_metadata_edit_does_not_bump() {
        let mut b = new_benchmark("Support", None, ids(&["a", "b"])).expect("valid");
        let bumped = apply_benchmark_update(
            &mut b,
            BenchmarkUpdate {
                name: Some("Support v2".to_string()),
                description: Some("renamed".to_string()),
                test_case_ids: None,
            },
        )
        .expect("update");
        assert!(!bumped);
        assert_eq!(b.current_version, 1);
        assert_eq!(b.name, "Support v2");
    }

    #[test]
    fn test_reorder_does_not_bump() {
        let mut b = new_benchmark("Support", None, ids(&["a", "b"])).expect("valid");
        let bumped = apply_benchmark_update(
            &mut b,
            BenchmarkUpdate {
                test_case_ids: Some(ids(&["b", "a"])),
                ..Default::default()
            },
        )
        .expect("update");
        assert!(!bumped);
        assert_eq!(b.current_version, 1);
        assert_eq!(b.test_case_ids, ids(&["b", "a"]));
    }

    #[test]
    fn test_membership_change_appends_version() {
        let mut b = new_benchmark("Support", None, ids(&["a", "b"])).expect("valid");
        let bumped = apply_benchmark_update(
            &mut b,
            BenchmarkUpdate {
                test_case_ids: Some(ids(&["a", "b", "c"])),
                ..Default::default()
            },
        )
        .expect("update");
        assert!(bumped);
        assert_eq!(b.current_version, 2);
        assert_eq!(b.versions.len(), 2);
        assert_eq!(
            b.version(2).map(|v| v.test_case_ids.clone()),
            Some(ids(&["a", "b", "c"]))
        );
    }

    #[test]
    fn test_test_case_rename_keeps_version() {
        let mut tc = TestCase::new("a", "A", "do a");
        assert!(!apply_test_case_update(
            &mut tc,
            TestCaseUpdate {
                name: Some("Renamed".to_string()),
                ..Default::default()
            }
        ));
        assert_eq!(tc.version, 1);

        assert!(apply_test_case_update(
            &mut tc,
            TestCaseUpdate {
                prompt: Some("do a differently".to_string()),
                ..Default::default()
            }
        ));
        assert_eq!(tc.version, 2);
    }

    #[test]
    fn test_new_run_snapshots_current_version() {
        let mut b = new_benchmark("Support", None, ids(&["a", "b"])).expect("valid");
        apply_benchmark_update(
            &mut b,
            BenchmarkUpdate {
                test_case_ids: Some(ids(&["a", "b", "c"])),
                ..Default::default()
            },
        )
        .expect("update");

        let mut cases = HashMap::new();
        for id in ["a", "b", "c"] {
            cases.insert(id.to_string(), TestCase::new(id, id.to_uppercase(), "p"));
        }
        let snapshots = snapshot_test_cases(&b, &cases).expect("snapshots");
        let run = new_run(&b, "agent", "model", snapshots, None);

        assert_eq!(run.benchmark_version, 2);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.test_case_snapshots.len(), 3);
        assert_eq!(run.results.len(), 3);
        assert!(run.results.values().all(|r| r == &TestCaseResult::pending()));
    }

    #[test]
    fn test_snapshot_unknown_test_case() {
        let b = new_benchmark("Support", None, ids(&["missing"])).expect("valid");
        let err = snapshot_test_cases(&b, &HashMap::new()).unwrap_err();
        assert!(matches!(err, VersioningError::UnknownTestCase(id) if id == "missing"));
    }
}
