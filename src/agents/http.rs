//! HTTP agent client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{AgentClient, AgentRequest, AgentResponse};
use crate::config::AgentEndpoint;
use crate::error::AgentError;

/// Posts `{agentKey, modelId, testCase}` to an agent endpoint and parses
/// `{trajectory, runId}` back.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    endpoint: String,
    trace_mode: bool,
    http_client: Client,
}

impl HttpAgentClient {
    pub fn new(endpoint: impl Into<String>, trace_mode: bool, timeout: Duration) -> Self {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            endpoint: endpoint.into(),
            trace_mode,
            http_client,
        }
    }

    pub fn from_endpoint(endpoint: &AgentEndpoint) -> Self {
        Self::new(&endpoint.endpoint, endpoint.trace_mode, endpoint.timeout())
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    fn trace_mode(&self) -> bool {
        self.trace_mode
    }

    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        debug!(
            endpoint = %self.endpoint,
            test_case_id = %request.test_case.id,
            "Invoking agent"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AgentError::Unreachable(e.to_string())
                } else {
                    AgentError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(AgentError::Status {
                code: status.as_u16(),
                message,
            });
        }

        response
            .json::<AgentResponse>()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))
    }
}
