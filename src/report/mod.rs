//! Evaluation reports and trajectories.
//!
//! A report records the outcome of one agent invocation for one test case.
//! Its `metricsStatus` moves `pending -> ready | error` exactly once; for
//! trace-mode agents that transition is driven by the trace-polling judge
//! pipeline (see `judge::pipeline`).

pub mod spans;
pub mod types;

pub use spans::trajectory_from_spans;
pub use types::{
    EvaluationReport, MetricsStatus, PassFailStatus, ReportUpdate, Span, StepType, TrajectoryStep,
};
