//! Error types for the external collaborators of the evaluation engine.
//!
//! Defines error types for the black-box interfaces the engine consumes:
//! - Agent invocation
//! - Observability backend (trace/span retrieval)
//! - Judge scoring
//! - LLM API interactions used by the reference judge
//!
//! Storage, orchestration and pipeline errors live next to their modules
//! (`storage::StoreError`, `runner::RunError`, `judge::PipelineError`).

use thiserror::Error;

/// Errors that can occur while invoking an agent for a test case.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent '{0}' is not configured")]
    UnknownAgent(String),

    #[error("Agent request failed: {0}")]
    RequestFailed(String),

    #[error("Agent returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Failed to parse agent response: {0}")]
    InvalidResponse(String),

    #[error("Agent interface unreachable: {0}")]
    Unreachable(String),
}

impl AgentError {
    /// Whether the failure means the agent interface as a whole is unusable,
    /// as opposed to a failure scoped to a single test case.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::UnknownAgent(_) | AgentError::Unreachable(_))
    }
}

/// Errors that can occur while querying the observability backend for spans.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Trace backend is not configured")]
    NotConfigured,

    #[error("Trace request failed: {0}")]
    RequestFailed(String),

    #[error("Trace backend returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Failed to parse spans: {0}")]
    InvalidResponse(String),
}

/// Errors that can occur while judging a trajectory.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("No judge is configured")]
    NotConfigured,

    #[error("Judge request failed: {0}")]
    RequestFailed(String),

    #[error("Judge returned an unparseable verdict: {0}")]
    InvalidVerdict(String),

    #[error("Nothing to judge: {0}")]
    EmptyTrajectory(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_fatality() {
        assert!(AgentError::UnknownAgent("x".to_string()).is_fatal());
        assert!(AgentError::Unreachable("connection refused".to_string()).is_fatal());
        assert!(!AgentError::RequestFailed("boom".to_string()).is_fatal());
        assert!(!AgentError::Status {
            code: 500,
            message: "oops".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = TraceError::Status {
            code: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.to_string().contains("503"));

        let err = JudgeError::from(LlmError::RateLimited("slow down".to_string()));
        assert!(err.to_string().contains("slow down"));
    }
}
