//! Evaluation report documents and the trajectory/span data they carry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Judgment state of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsStatus {
    /// Agent finished; judgment awaits trace propagation.
    Pending,
    /// A final pass/fail verdict exists.
    Ready,
    /// The judging workflow gave up.
    Error,
}

impl std::fmt::Display for MetricsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsStatus::Pending => write!(f, "pending"),
            MetricsStatus::Ready => write!(f, "ready"),
            MetricsStatus::Error => write!(f, "error"),
        }
    }
}

/// Verdict of the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassFailStatus {
    Passed,
    Failed,
}

impl std::fmt::Display for PassFailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassFailStatus::Passed => write!(f, "passed"),
            PassFailStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of a trajectory step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Thinking,
    Action,
    ToolResult,
    Response,
}

/// One step of an agent trajectory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryStep {
    pub step_type: StepType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TrajectoryStep {
    pub fn new(step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            step_type,
            content: content.into(),
            tool_name: None,
            tool_args: None,
            timestamp: None,
        }
    }

    pub fn action(tool_name: impl Into<String>, tool_args: serde_json::Value) -> Self {
        let tool_name = tool_name.into();
        Self {
            step_type: StepType::Action,
            content: format!("call {}", tool_name),
            tool_name: Some(tool_name),
            tool_args: Some(tool_args),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// One recorded unit of execution from the observability backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Outcome of running one test case once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub id: String,
    pub test_case_id: String,
    #[serde(default)]
    pub test_case_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark_run_id: Option<String>,
    pub agent_key: String,
    pub model_id: String,
    /// Agent-side run id used to correlate spans in the observability backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub trajectory: Vec<TrajectoryStep>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_fail_status: Option<PassFailStatus>,
    pub metrics_status: MetricsStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_judge_reasoning: Option<String>,
    #[serde(default)]
    pub improvement_strategies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_fetch_attempts: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationReport {
    /// Creates a report in the `pending` state for the given test case.
    pub fn new(
        test_case_id: impl Into<String>,
        agent_key: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("report-{}", Uuid::new_v4()),
            test_case_id: test_case_id.into(),
            test_case_version: 1,
            benchmark_id: None,
            benchmark_run_id: None,
            agent_key: agent_key.into(),
            model_id: model_id.into(),
            run_id: None,
            trajectory: Vec::new(),
            metrics: BTreeMap::new(),
            pass_fail_status: None,
            metrics_status: MetricsStatus::Pending,
            llm_judge_reasoning: None,
            improvement_strategies: Vec::new(),
            trace_error: None,
            trace_fetch_attempts: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_test_case_version(mut self, version: u32) -> Self {
        self.test_case_version = version;
        self
    }

    pub fn with_owner(mut self, benchmark_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        self.benchmark_id = Some(benchmark_id.into());
        self.benchmark_run_id = Some(run_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_trajectory(mut self, trajectory: Vec<TrajectoryStep>) -> Self {
        self.trajectory = trajectory;
        self
    }

    /// Whether the trace-polling pipeline should own this report.
    pub fn awaiting_traces(&self) -> bool {
        self.metrics_status == MetricsStatus::Pending
            && self.run_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn attempts(&self) -> u32 {
        self.trace_fetch_attempts.unwrap_or(0)
    }

    /// Marks the report as terminally failed with `message`.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.metrics_status = MetricsStatus::Error;
        self.trace_error = Some(message.into());
        self.updated_at = Utc::now();
    }
}

/// Partial edit of a report's judgment fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportUpdate {
    #[serde(default)]
    pub metrics_status: Option<MetricsStatus>,
    #[serde(default)]
    pub pass_fail_status: Option<PassFailStatus>,
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub llm_judge_reasoning: Option<String>,
    #[serde(default)]
    pub improvement_strategies: Option<Vec<String>>,
    #[serde(default)]
    pub trace_error: Option<String>,
}

impl ReportUpdate {
    /// Applies the set fields to `report`.
    ///
    /// Returns true if `metricsStatus` changed.
    pub fn apply(&self, report: &mut EvaluationReport) -> bool {
        let before = report.metrics_status;

        if let Some(status) = self.metrics_status {
            report.metrics_status = status;
        }
        if let Some(verdict) = self.pass_fail_status {
            report.pass_fail_status = Some(verdict);
        }
        if let Some(metrics) = &self.metrics {
            report.metrics = metrics.clone();
        }
        if let Some(reasoning) = &self.llm_judge_reasoning {
            report.llm_judge_reasoning = Some(reasoning.clone());
        }
        if let Some(strategies) = &self.improvement_strategies {
            report.improvement_strategies = strategies.clone();
        }
        if let Some(error) = &self.trace_error {
            report.trace_error = Some(error.clone());
        }
        report.updated_at = Utc::now();

        report.metrics_status != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awaiting_traces_requires_run_id() {
        let report = EvaluationReport::new("tc-1", "agent", "model");
        assert!(!report.awaiting_traces());

        let report = report.with_run_id("");
        assert!(!report.awaiting_traces());

        let mut report = report.with_run_id("trace-run-1");
        assert!(report.awaiting_traces());

        report.mark_error("gave up");
        assert!(!report.awaiting_traces());
        assert_eq!(report.trace_error.as_deref(), Some("gave up"));
    }

    #[test]
    fn test_report_wire_format() {
        let mut report = EvaluationReport::new("tc-1", "agent", "model").with_run_id("r");
        report.trace_fetch_attempts = Some(3);
        let value = serde_json::to_value(&report).expect("serialize");

        assert_eq!(value["metricsStatus"], "pending");
        assert_eq!(value["traceFetchAttempts"], 3);
        assert_eq!(value["runId"], "r");
        assert!(value.get("passFailStatus").is_none());

        let parsed: EvaluationReport = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed.attempts(), 3);
    }

    #[test]
    fn test_update_reports_status_change() {
        let mut report = EvaluationReport::new("tc-1", "agent", "model");
        let update: ReportUpdate = serde_json::from_value(serde_json::json!({
            "metricsStatus": "ready",
            "passFailStatus": "passed"
        }))
        .expect("deserialize");

        assert!(update.apply(&mut report));
        assert_eq!(report.pass_fail_status, Some(PassFailStatus::Passed));

        let reasoning_only = ReportUpdate {
            llm_judge_reasoning: Some("manual review".to_string()),
            ..Default::default()
        };
        assert!(!reasoning_only.apply(&mut report));
        assert_eq!(report.llm_judge_reasoning.as_deref(), Some("manual review"));
    }

    #[test]
    fn test_step_type_names() {
        let step = TrajectoryStep::new(StepType::ToolResult, "42");
        let value = serde_json::to_value(&step).expect("serialize");
        assert_eq!(value["stepType"], "tool_result");
    }
}
