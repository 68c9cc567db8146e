//! Agents under evaluation.
//!
//! The engine only sees the [`AgentClient`] trait. An agent is either
//! immediate-mode (its response trajectory is judged inline) or trace-mode
//! (judged later from spans correlated by the returned `runId`).

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::benchmark::TestCase;
use crate::config::AgentEndpoint;
use crate::error::AgentError;
use crate::report::TrajectoryStep;

pub use http::HttpAgentClient;

/// Payload sent to an agent for one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub agent_key: String,
    pub model_id: String,
    pub test_case: TestCase,
}

/// What an agent returned for one test case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    #[serde(default)]
    pub trajectory: Vec<TrajectoryStep>,
    /// Correlation id for the agent's spans in the observability backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Whether reports from this agent are judged from traces.
    fn trace_mode(&self) -> bool;

    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Agent clients keyed by agent key.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentClient>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds HTTP clients for every configured agent endpoint.
    pub fn from_endpoints(endpoints: &[AgentEndpoint]) -> Self {
        let mut registry = Self::new();
        for endpoint in endpoints {
            registry.register(
                endpoint.key.clone(),
                Arc::new(HttpAgentClient::from_endpoint(endpoint)),
            );
        }
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, client: Arc<dyn AgentClient>) {
        self.agents.insert(key.into(), client);
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn AgentClient>, AgentError> {
        self.agents
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgent(key.to_string()))
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let endpoints = vec![AgentEndpoint {
            key: "support-bot".to_string(),
            endpoint: "http://localhost:8080/invoke".to_string(),
            trace_mode: true,
            timeout_secs: 60,
        }];
        let registry = AgentRegistry::from_endpoints(&endpoints);

        let agent = registry.get("support-bot").expect("registered");
        assert!(agent.trace_mode());
        assert_eq!(registry.keys(), vec!["support-bot"]);

        let err = registry.get("missing").err().expect("unknown agent");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_agent_response_parsing() {
        let raw = r#"{"trajectory":[{"stepType":"response","content":"done"}],"runId":"abc"}"#;
        let response: AgentResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(response.run_id.as_deref(), Some("abc"));
        assert_eq!(response.trajectory.len(), 1);

        let empty: AgentResponse = serde_json::from_str("{}").expect("parse");
        assert!(empty.trajectory.is_empty());
        assert!(empty.run_id.is_none());
    }
}
