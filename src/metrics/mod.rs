//! Metrics module for Prometheus-based monitoring.
//!
//! Covers run outcomes, per-test-case results, trace polling, judge latency
//! and storage conflicts.
//!
//! # Example
//!
//! ```ignore
//! use bench_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_run("completed");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, PollOutcome, TokenUsage};
pub use prometheus::{export_metrics, init_metrics};
