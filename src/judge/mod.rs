//! Judging trajectories and the trace-polling judge pipeline.
//!
//! - **Judge**: black-box scoring of a trajectory against a test case
//! - **TraceSource**: span retrieval from the observability backend
//! - **TracePollingPipeline**: per-report polling state machine that turns a
//!   `pending` trace-mode report into `ready` or `error`

pub mod llm_judge;
pub mod pipeline;
pub mod traces;
pub mod verdict;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::benchmark::TestCase;
use crate::error::JudgeError;
use crate::report::{EvaluationReport, MetricsStatus, PassFailStatus, TrajectoryStep};

pub use llm_judge::LlmJudge;
pub use pipeline::{PipelineError, PollingConfig, TracePollingPipeline};
pub use traces::{HttpTraceSource, TraceSource, UnconfiguredTraceSource};

/// Everything the judge needs to grade one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub test_case_id: String,
    pub prompt: String,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_trajectory: Option<Vec<TrajectoryStep>>,
    pub trajectory: Vec<TrajectoryStep>,
}

impl JudgeRequest {
    pub fn new(test_case: &TestCase, trajectory: Vec<TrajectoryStep>) -> Self {
        Self {
            test_case_id: test_case.id.clone(),
            prompt: test_case.prompt.clone(),
            context: test_case.context.clone(),
            expected_outcomes: test_case.expected_outcomes.clone(),
            expected_trajectory: test_case.expected_trajectory.clone(),
            trajectory,
        }
    }
}

/// Final verdict for one agent run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JudgeVerdict {
    pub pass_fail_status: PassFailStatus,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub llm_judge_reasoning: String,
    #[serde(default)]
    pub improvement_strategies: Vec<String>,
}

impl JudgeVerdict {
    pub fn passed(reasoning: impl Into<String>) -> Self {
        Self {
            pass_fail_status: PassFailStatus::Passed,
            metrics: BTreeMap::new(),
            llm_judge_reasoning: reasoning.into(),
            improvement_strategies: Vec::new(),
        }
    }

    pub fn failed(reasoning: impl Into<String>) -> Self {
        Self {
            pass_fail_status: PassFailStatus::Failed,
            ..Self::passed(reasoning)
        }
    }

    /// Writes the verdict onto `report` and marks it `ready`.
    pub fn apply_to(&self, report: &mut EvaluationReport) {
        report.metrics_status = MetricsStatus::Ready;
        report.pass_fail_status = Some(self.pass_fail_status);
        report.metrics = self.metrics.clone();
        report.llm_judge_reasoning = Some(self.llm_judge_reasoning.clone());
        report.improvement_strategies = self.improvement_strategies.clone();
        report.trace_error = None;
        report.updated_at = Utc::now();
    }
}

/// Scores a trajectory against a test case's expectations.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: JudgeRequest) -> Result<JudgeVerdict, JudgeError>;
}

/// Judge used when no LLM endpoint is configured; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredJudge;

#[async_trait]
impl Judge for UnconfiguredJudge {
    async fn judge(&self, _request: JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        Err(JudgeError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StepType;

    #[test]
    fn test_request_from_test_case() {
        let test_case = TestCase::new("tc-1", "refund", "Refund order A-1")
            .with_expected_outcomes(vec!["refund issued".to_string()]);
        let request = JudgeRequest::new(
            &test_case,
            vec![TrajectoryStep::new(StepType::Response, "Refunded.")],
        );
        assert_eq!(request.test_case_id, "tc-1");
        assert_eq!(request.expected_outcomes, vec!["refund issued"]);
        assert_eq!(request.trajectory.len(), 1);
    }

    #[test]
    fn test_apply_verdict() {
        let mut report = EvaluationReport::new("tc-1", "agent", "model");
        report.trace_error = Some("stale".to_string());

        let mut verdict = JudgeVerdict::failed("wrong order refunded");
        verdict.metrics.insert("accuracy".to_string(), 0.2);
        verdict.apply_to(&mut report);

        assert_eq!(report.metrics_status, MetricsStatus::Ready);
        assert_eq!(report.pass_fail_status, Some(PassFailStatus::Failed));
        assert_eq!(report.metrics.get("accuracy"), Some(&0.2));
        assert!(report.trace_error.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_judge_fails() {
        let request = JudgeRequest::new(&TestCase::new("tc-1", "n", "p"), Vec::new());
        let err = UnconfiguredJudge.judge(request).await.unwrap_err();
        assert!(matches!(err, JudgeError::NotConfigured));
    }
}
