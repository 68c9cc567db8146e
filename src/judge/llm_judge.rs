//! LLM-backed judge.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::verdict::parse_verdict;
use super::{Judge, JudgeRequest, JudgeVerdict};
use crate::error::JudgeError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::metrics::{MetricsCollector, TokenUsage};
use crate::report::{StepType, TrajectoryStep};

/// System prompt for grading an agent trajectory.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are an impartial evaluator of AI agent behavior.

You receive a task given to an agent, the outcomes the agent was expected to
achieve, optionally the expected sequence of steps, and the trajectory the
agent actually produced.

Decide whether the agent achieved every expected outcome. Score accuracy
between 0.0 and 1.0. When the agent fell short, list concrete changes that
would have made it succeed.

Respond with a single JSON object and nothing else:
{"passed": <bool>, "metrics": {"accuracy": <number>}, "reasoning": "<string>", "improvementStrategies": ["<string>", ...]}"#;

/// Judge that asks an LLM to grade the trajectory.
pub struct LlmJudge {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    metrics: MetricsCollector,
}

impl LlmJudge {
    /// Creates a judge using `model`; an empty model defers to the
    /// provider's default.
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 2048,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(request: &JudgeRequest) -> String {
        let mut prompt = format!("## Task\n{}\n", request.prompt);

        if !request.context.is_empty() {
            prompt.push_str("\n## Context\n");
            for line in &request.context {
                prompt.push_str(&format!("- {}\n", line));
            }
        }

        prompt.push_str("\n## Expected outcomes\n");
        if request.expected_outcomes.is_empty() {
            prompt.push_str("- (none stated; judge whether the task was completed)\n");
        }
        for outcome in &request.expected_outcomes {
            prompt.push_str(&format!("- {}\n", outcome));
        }

        if let Some(expected) = &request.expected_trajectory {
            prompt.push_str("\n## Expected trajectory\n");
            prompt.push_str(&render_trajectory(expected));
        }

        prompt.push_str("\n## Actual trajectory\n");
        prompt.push_str(&render_trajectory(&request.trajectory));
        prompt
    }
}

fn render_trajectory(steps: &[TrajectoryStep]) -> String {
    let mut out = String::new();
    for (i, step) in steps.iter().enumerate() {
        let label = match step.step_type {
            StepType::Thinking => "thinking",
            StepType::Action => "action",
            StepType::ToolResult => "tool_result",
            StepType::Response => "response",
        };
        match (&step.tool_name, &step.tool_args) {
            (Some(tool), Some(args)) => {
                out.push_str(&format!("{}. [{}] {}({})\n", i + 1, label, tool, args))
            }
            (Some(tool), None) => out.push_str(&format!("{}. [{}] {}\n", i + 1, label, tool)),
            _ => out.push_str(&format!("{}. [{}] {}\n", i + 1, label, step.content)),
        }
    }
    out
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, request: JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        if request.trajectory.is_empty() {
            return Err(JudgeError::EmptyTrajectory(request.test_case_id));
        }

        let generation = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(JUDGE_SYSTEM_PROMPT),
                Message::user(Self::build_prompt(&request)),
            ],
        )
        .with_temperature(0.0)
        .with_max_tokens(self.max_tokens);

        let started = Instant::now();
        let result = self.provider.generate(generation).await;
        let latency = started.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(test_case_id = %request.test_case_id, error = %e, "Judge LLM call failed");
                self.metrics
                    .record_llm_request(&self.model, false, latency, TokenUsage::default());
                return Err(e.into());
            }
        };

        self.metrics.record_llm_request(
            &response.model,
            true,
            latency,
            TokenUsage::new(
                response.usage.prompt_tokens as u64,
                response.usage.completion_tokens as u64,
            ),
        );

        let content = response
            .first_content()
            .ok_or_else(|| JudgeError::InvalidVerdict("empty response".to_string()))?;

        let verdict = parse_verdict(content)?;
        debug!(
            test_case_id = %request.test_case_id,
            verdict = %verdict.pass_fail_status,
            "Judge verdict parsed"
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use crate::report::PassFailStatus;
    use std::sync::Mutex;

    struct MockLlmProvider {
        response: Mutex<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockLlmProvider {
        fn new(response: &str) -> Self {
            Self {
                response: Mutex::new(response.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            if let Some(last) = request.messages.last() {
                self.prompts
                    .lock()
                    .expect("lock poisoned")
                    .push(last.content.clone());
            }
            let content = self.response.lock().expect("lock poisoned").clone();
            Ok(GenerationResponse {
                id: "test-id".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(content),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                },
            })
        }
    }

    fn request() -> JudgeRequest {
        JudgeRequest {
            test_case_id: "tc-1".to_string(),
            prompt: "Refund order A-1".to_string(),
            context: vec!["Customer is verified".to_string()],
            expected_outcomes: vec!["refund issued for A-1".to_string()],
            expected_trajectory: None,
            trajectory: vec![
                TrajectoryStep::action("issue_refund", serde_json::json!({"order": "A-1"})),
                TrajectoryStep::new(StepType::Response, "Your refund is on its way."),
            ],
        }
    }

    #[tokio::test]
    async fn test_judge_parses_verdict() {
        let provider = Arc::new(MockLlmProvider::new(
            r#"{"passed": true, "metrics": {"accuracy": 1.0}, "reasoning": "Refund issued"}"#,
        ));
        let judge = LlmJudge::new(provider.clone(), "judge-model");

        let verdict = judge.judge(request()).await.expect("verdict");
        assert_eq!(verdict.pass_fail_status, PassFailStatus::Passed);
        assert_eq!(verdict.llm_judge_reasoning, "Refund issued");

        let prompts = provider.prompts.lock().expect("lock poisoned");
        assert!(prompts[0].contains("refund issued for A-1"));
        assert!(prompts[0].contains("issue_refund"));
        assert!(prompts[0].contains("Customer is verified"));
    }

    #[tokio::test]
    async fn test_judge_rejects_empty_trajectory() {
        let judge = LlmJudge::new(Arc::new(MockLlmProvider::new("{}")), "");
        let mut req = request();
        req.trajectory.clear();
        let err = judge.judge(req).await.unwrap_err();
        assert!(matches!(err, JudgeError::EmptyTrajectory(_)));
    }

    #[tokio::test]
    async fn test_judge_unparseable_response() {
        let judge = LlmJudge::new(Arc::new(MockLlmProvider::new("Looks fine to me")), "");
        let err = judge.judge(request()).await.unwrap_err();
        assert!(matches!(err, JudgeError::InvalidVerdict(_)));
    }
}
