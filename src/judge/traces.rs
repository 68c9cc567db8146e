//! Span retrieval from the observability backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::TraceError;
use crate::report::Span;

/// Source of spans for an agent run.
///
/// An empty result is normal: spans may take minutes to propagate.
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn fetch_spans(&self, run_id: &str) -> Result<Vec<Span>, TraceError>;
}

/// Trace source used when no observability backend is configured.
///
/// Every fetch fails, so trace-mode reports exhaust their attempts and end
/// in `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTraceSource;

#[async_trait]
impl TraceSource for UnconfiguredTraceSource {
    async fn fetch_spans(&self, _run_id: &str) -> Result<Vec<Span>, TraceError> {
        Err(TraceError::NotConfigured)
    }
}

/// Fetches spans with `GET {endpoint}/runs/{runId}/spans`.
///
/// A 404 means the backend has not seen the run yet and yields no spans.
#[derive(Debug, Clone)]
pub struct HttpTraceSource {
    endpoint: String,
    http_client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpansBody {
    Wrapped { spans: Vec<Span> },
    Bare(Vec<Span>),
}

impl HttpTraceSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn spans_url(&self, run_id: &str) -> String {
        format!("{}/runs/{}/spans", self.endpoint, run_id)
    }
}

#[async_trait]
impl TraceSource for HttpTraceSource {
    async fn fetch_spans(&self, run_id: &str) -> Result<Vec<Span>, TraceError> {
        let response = self
            .http_client
            .get(self.spans_url(run_id))
            .send()
            .await
            .map_err(|e| TraceError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TraceError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let body: SpansBody = response
            .json()
            .await
            .map_err(|e| TraceError::InvalidResponse(e.to_string()))?;

        Ok(match body {
            SpansBody::Wrapped { spans } => spans,
            SpansBody::Bare(spans) => spans,
        })
    }
}
