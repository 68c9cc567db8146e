//! Benchmark, run and test case documents.
//!
//! A [`Benchmark`] is a single stored document that owns all of its
//! [`BenchmarkRun`]s. Runs are mutated in place through targeted updates
//! (see `storage::EvalStore`), never by overwriting the whole benchmark.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::TrajectoryStep;

/// A named, versioned collection of test case ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Benchmark {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub test_case_ids: Vec<String>,
    pub current_version: u32,
    #[serde(default)]
    pub versions: Vec<BenchmarkVersion>,
    #[serde(default)]
    pub runs: Vec<BenchmarkRun>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Benchmark {
    /// Returns the run with the given id, if any.
    pub fn run(&self, run_id: &str) -> Option<&BenchmarkRun> {
        self.runs.iter().find(|r| r.id == run_id)
    }

    /// Returns a mutable reference to the run with the given id, if any.
    pub fn run_mut(&mut self, run_id: &str) -> Option<&mut BenchmarkRun> {
        self.runs.iter_mut().find(|r| r.id == run_id)
    }

    /// Returns the version entry matching `version`, if recorded.
    pub fn version(&self, version: u32) -> Option<&BenchmarkVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

/// One entry in a benchmark's version history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkVersion {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub test_case_ids: Vec<String>,
}

/// Status of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One execution of a benchmark against a chosen agent/model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRun {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub agent_key: String,
    pub model_id: String,
    pub status: RunStatus,
    pub benchmark_version: u32,
    pub test_case_snapshots: Vec<TestCaseSnapshot>,
    /// Keyed by test case id.
    #[serde(default)]
    pub results: BTreeMap<String, TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BenchmarkRun {
    /// Returns true when every result has a terminal status.
    pub fn all_results_terminal(&self) -> bool {
        self.results.values().all(|r| r.status.is_terminal())
    }

    /// Converts every result that never started into `failed`.
    ///
    /// Returns the number of results that were converted.
    pub fn fail_unstarted(&mut self, reason: &str) -> usize {
        let mut converted = 0;
        for result in self.results.values_mut() {
            if matches!(result.status, ResultStatus::Pending | ResultStatus::Running) {
                result.status = ResultStatus::Failed;
                result.error.get_or_insert_with(|| reason.to_string());
                converted += 1;
            }
        }
        converted
    }
}

/// Identity and version of a test case at run-creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSnapshot {
    pub id: String,
    pub version: u32,
    pub name: String,
}

/// Status of a single test case within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ResultStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResultStatus::Completed | ResultStatus::Failed | ResultStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultStatus::Pending => write!(f, "pending"),
            ResultStatus::Running => write!(f, "running"),
            ResultStatus::Completed => write!(f, "completed"),
            ResultStatus::Failed => write!(f, "failed"),
            ResultStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one test case within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestCaseResult {
    /// Placeholder written at run creation.
    pub fn pending() -> Self {
        Self {
            report_id: None,
            status: ResultStatus::Pending,
            error: None,
        }
    }

    /// The agent produced a report.
    pub fn completed(report_id: impl Into<String>) -> Self {
        Self {
            report_id: Some(report_id.into()),
            status: ResultStatus::Completed,
            error: None,
        }
    }

    /// The agent invocation failed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            report_id: None,
            status: ResultStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Derived pass/fail/pending counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub passed: u32,
    pub failed: u32,
    pub pending: u32,
    pub total: u32,
}

/// A single scenario (prompt + expected outcome) to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_trajectory: Option<Vec<TrajectoryStep>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestCase {
    /// Creates a version-1 test case.
    pub fn new(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            version: 1,
            description: None,
            prompt: prompt.into(),
            context: Vec::new(),
            expected_outcomes: Vec::new(),
            expected_trajectory: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_expected_outcomes(mut self, outcomes: Vec<String>) -> Self {
        self.expected_outcomes = outcomes;
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    /// Snapshot of this test case's identity and version.
    pub fn snapshot(&self) -> TestCaseSnapshot {
        TestCaseSnapshot {
            id: self.id.clone(),
            version: self.version,
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run() -> BenchmarkRun {
        let mut results = BTreeMap::new();
        results.insert("tc-a".to_string(), TestCaseResult::completed("r-1"));
        results.insert("tc-b".to_string(), TestCaseResult::pending());
        results.insert("tc-c".to_string(), TestCaseResult::pending());
        BenchmarkRun {
            id: "run-1".to_string(),
            name: None,
            created_at: Utc::now(),
            completed_at: None,
            agent_key: "agent".to_string(),
            model_id: "model".to_string(),
            status: RunStatus::Running,
            benchmark_version: 1,
            test_case_snapshots: Vec::new(),
            results,
            stats: None,
            error: None,
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
        assert_eq!(ResultStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RunStatus::Completed).expect("serialize");
        assert_eq!(json, "\"completed\"");
        let parsed: ResultStatus = serde_json::from_str("\"cancelled\"").expect("deserialize");
        assert_eq!(parsed, ResultStatus::Cancelled);
    }

    #[test]
    fn test_fail_unstarted_keeps_finished_results() {
        let mut run = sample_run();
        assert!(!run.all_results_terminal());

        let converted = run.fail_unstarted("run cancelled before test case started");
        assert_eq!(converted, 2);
        assert!(run.all_results_terminal());
        assert_eq!(run.results["tc-a"], TestCaseResult::completed("r-1"));
        assert_eq!(run.results["tc-b"].status, ResultStatus::Failed);
        assert!(run.results["tc-c"].error.is_some());
    }

    #[test]
    fn test_run_serializes_camel_case() {
        let run = sample_run();
        let value = serde_json::to_value(&run).expect("serialize");
        assert!(value.get("agentKey").is_some());
        assert!(value.get("testCaseSnapshots").is_some());
        assert_eq!(value["results"]["tc-a"]["reportId"], "r-1");
        assert!(value.get("stats").is_none());
    }

    #[test]
    fn test_test_case_snapshot() {
        let tc = TestCase::new("tc-1", "Refund flow", "Issue a refund")
            .with_expected_outcomes(vec!["refund issued".to_string()]);
        let snap = tc.snapshot();
        assert_eq!(snap.id, "tc-1");
        assert_eq!(snap.version, 1);
        assert_eq!(snap.name, "Refund flow");
    }
}
