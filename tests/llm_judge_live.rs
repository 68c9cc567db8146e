//! Integration tests for the LLM judge against a live LiteLLM endpoint.
//!
//! Run with: LITELLM_API_BASE=... LITELLM_API_KEY=... cargo test --test llm_judge_live -- --ignored

use std::sync::Arc;

use bench_forge::benchmark::TestCase;
use bench_forge::error::JudgeError;
use bench_forge::judge::{Judge, JudgeRequest, LlmJudge};
use bench_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use bench_forge::report::{PassFailStatus, StepType, TrajectoryStep};

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env().expect("LITELLM_API_BASE must be set for live tests")
}

fn refund_test_case() -> TestCase {
    TestCase::new("refund", "Refund", "Refund order A-1 for the customer.")
        .with_expected_outcomes(vec!["a refund is issued for order A-1".to_string()])
}

#[tokio::test]
#[ignore]
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await.expect("generation");
    let content = response.first_content().expect("content");
    assert!(content.contains('4'), "got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_judge_passes_successful_trajectory() {
    let judge = LlmJudge::new(Arc::new(create_test_client()), "");
    let request = JudgeRequest::new(
        &refund_test_case(),
        vec![
            TrajectoryStep::action("issue_refund", serde_json::json!({"order": "A-1"})),
            TrajectoryStep::new(StepType::ToolResult, "refund issued for A-1"),
            TrajectoryStep::new(StepType::Response, "Your refund for A-1 has been issued."),
        ],
    );

    let verdict = judge.judge(request).await.expect("verdict");
    assert_eq!(verdict.pass_fail_status, PassFailStatus::Passed);
    assert!(!verdict.llm_judge_reasoning.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_judge_fails_wrong_trajectory() {
    let judge = LlmJudge::new(Arc::new(create_test_client()), "");
    let request = JudgeRequest::new(
        &refund_test_case(),
        vec![TrajectoryStep::new(
            StepType::Response,
            "Sorry, I cannot help with refunds.",
        )],
    );

    let verdict = judge.judge(request).await.expect("verdict");
    assert_eq!(verdict.pass_fail_status, PassFailStatus::Failed);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let client = LiteLlmClient::new("http://127.0.0.1:9".to_string(), None, "gpt-4o".to_string())
        .with_timeout(std::time::Duration::from_secs(2));
    let judge = LlmJudge::new(Arc::new(client), "");
    let request = JudgeRequest::new(
        &refund_test_case(),
        vec![TrajectoryStep::new(StepType::Response, "done")],
    );

    let err = judge.judge(request).await.unwrap_err();
    assert!(matches!(err, JudgeError::Llm(_)));
}
