//! High-level metric recording for bench_forge operations.
//!
//! `MetricsCollector` wraps the raw Prometheus statics so call sites never
//! deal with label ordering or uninitialized registries.

use super::prometheus::{
    ACTIVE_POLLERS, JUDGE_LATENCY, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL, RUNS_TOTAL,
    STORE_CONFLICTS_TOTAL, TEST_CASES_TOTAL, TRACE_POLLS_TOTAL,
};

/// Token usage information for LLM requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Number of input/prompt tokens.
    pub input_tokens: u64,
    /// Number of output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Outcome label for a single trace polling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Spans were found and the report was judged.
    Found,
    /// No spans yet; another attempt will follow.
    Empty,
    /// The trace source returned an error.
    FetchError,
    /// Attempts were exhausted without spans.
    Exhausted,
}

impl PollOutcome {
    fn label(&self) -> &'static str {
        match self {
            PollOutcome::Found => "found",
            PollOutcome::Empty => "empty",
            PollOutcome::FetchError => "fetch_error",
            PollOutcome::Exhausted => "exhausted",
        }
    }
}

/// Metrics collector for recording bench_forge operational metrics.
///
/// Metrics must be initialized with `init_metrics()` for anything to be
/// recorded; otherwise every method only emits a trace event.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a run reaching a final status.
    pub fn record_run(&self, status: &str) {
        if let Some(runs_total) = RUNS_TOTAL.get() {
            runs_total.with_label_values(&[status]).inc();
        }

        tracing::trace!(status = status, "Recorded run metric");
    }

    /// Record one test case execution result.
    pub fn record_test_case(&self, status: &str) {
        if let Some(test_cases) = TEST_CASES_TOTAL.get() {
            test_cases.with_label_values(&[status]).inc();
        }

        tracing::trace!(status = status, "Recorded test case metric");
    }

    /// Record one trace polling attempt.
    pub fn record_trace_poll(&self, outcome: PollOutcome) {
        if let Some(polls) = TRACE_POLLS_TOTAL.get() {
            polls.with_label_values(&[outcome.label()]).inc();
        }

        tracing::trace!(outcome = outcome.label(), "Recorded trace poll metric");
    }

    /// Record how long a judge call took.
    pub fn record_judge_latency(&self, latency_secs: f64) {
        if let Some(latency) = JUDGE_LATENCY.get() {
            latency.observe(latency_secs);
        }
    }

    /// Record a version conflict during a targeted update.
    pub fn record_store_conflict(&self, collection: &str) {
        if let Some(conflicts) = STORE_CONFLICTS_TOTAL.get() {
            conflicts.with_label_values(&[collection]).inc();
        }

        tracing::trace!(collection = collection, "Recorded store conflict metric");
    }

    pub fn inc_active_pollers(&self) {
        if let Some(pollers) = ACTIVE_POLLERS.get() {
            pollers.inc();
        }
    }

    pub fn dec_active_pollers(&self) {
        if let Some(pollers) = ACTIVE_POLLERS.get() {
            pollers.dec();
        }
    }

    /// Record an LLM API request made by the judge.
    pub fn record_llm_request(
        &self,
        model: &str,
        success: bool,
        latency_secs: f64,
        tokens: TokenUsage,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(llm_requests) = LLM_REQUESTS_TOTAL.get() {
            llm_requests.with_label_values(&[model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[model])
                .observe(latency_secs);
        }

        if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
            llm_tokens
                .with_label_values(&[model, "input"])
                .inc_by(tokens.input_tokens as f64);
            llm_tokens
                .with_label_values(&[model, "output"])
                .inc_by(tokens.output_tokens as f64);
        }

        tracing::trace!(
            model = model,
            status = status,
            latency_secs = latency_secs,
            input_tokens = tokens.input_tokens,
            output_tokens = tokens.output_tokens,
            "Recorded LLM request metric"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_token_usage() {
        let usage = TokenUsage::new(1000, 500);
        assert_eq!(usage.total(), 1500);
        assert_eq!(TokenUsage::default().total(), 0);
    }

    #[test]
    fn test_record_run_and_test_cases() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_run("completed");
        collector.record_run("cancelled");
        collector.record_test_case("completed");
        collector.record_test_case("failed");
    }

    #[test]
    fn test_record_polling() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.inc_active_pollers();
        collector.record_trace_poll(PollOutcome::Empty);
        collector.record_trace_poll(PollOutcome::Found);
        collector.record_judge_latency(1.25);
        collector.dec_active_pollers();
    }

    #[test]
    fn test_record_store_conflict() {
        ensure_metrics_init();
        MetricsCollector::new().record_store_conflict("benchmarks");
    }

    #[test]
    fn test_record_llm_request() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();
        collector.record_llm_request("gpt-4o", true, 2.5, TokenUsage::new(1000, 500));
        collector.record_llm_request("gpt-4o", false, 5.0, TokenUsage::default());
    }
}
