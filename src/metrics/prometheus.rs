//! Prometheus metrics registration and export.
//!
//! All bench_forge metrics live in a single process-wide registry that is
//! created by [`init_metrics`]. Recording through [`super::MetricsCollector`]
//! before initialization is a silent no-op.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all bench_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Benchmark runs that reached a final state, labeled by status.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Test case executions, labeled by result status.
pub static TEST_CASES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Trace polling attempts, labeled by outcome.
pub static TRACE_POLLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of reports currently owned by a trace poller.
pub static ACTIVE_POLLERS: OnceLock<Gauge> = OnceLock::new();

/// Judge call latency in seconds.
pub static JUDGE_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Optimistic concurrency conflicts, labeled by collection.
pub static STORE_CONFLICTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless: later calls build a fresh
/// registry but the statics keep the first set of metrics.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Run metrics
    let runs_total = CounterVec::new(
        Opts::new("bench_forge_runs_total", "Benchmark runs that finished"),
        &["status"],
    )?;

    let test_cases_total = CounterVec::new(
        Opts::new("bench_forge_test_cases_total", "Test case executions"),
        &["status"],
    )?;

    // Trace polling metrics
    let trace_polls_total = CounterVec::new(
        Opts::new("bench_forge_trace_polls_total", "Trace polling attempts"),
        &["outcome"],
    )?;

    let active_pollers = Gauge::new(
        "bench_forge_active_pollers",
        "Reports currently owned by a trace poller",
    )?;

    let judge_latency = Histogram::with_opts(
        HistogramOpts::new(
            "bench_forge_judge_latency_seconds",
            "Judge call latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )?;

    // Storage metrics
    let store_conflicts_total = CounterVec::new(
        Opts::new(
            "bench_forge_store_conflicts_total",
            "Optimistic concurrency conflicts during targeted updates",
        ),
        &["collection"],
    )?;

    // LLM metrics
    let llm_requests_total = CounterVec::new(
        Opts::new("bench_forge_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "bench_forge_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("bench_forge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(test_cases_total.clone()))?;
    registry.register(Box::new(trace_polls_total.clone()))?;
    registry.register(Box::new(active_pollers.clone()))?;
    registry.register(Box::new(judge_latency.clone()))?;
    registry.register(Box::new(store_conflicts_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;

    // If any of these fail, metrics were already initialized
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = TEST_CASES_TOTAL.set(test_cases_total);
    let _ = TRACE_POLLS_TOTAL.set(trace_polls_total);
    let _ = ACTIVE_POLLERS.set(active_pollers);
    let _ = JUDGE_LATENCY.set(judge_latency);
    let _ = STORE_CONFLICTS_TOTAL.set(store_conflicts_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&["completed"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("bench_forge_runs_total"));
    }
}
