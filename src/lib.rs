//! bench-forge: benchmark execution engine for AI agents.
//!
//! This library runs benchmarks (versioned sets of test cases) against
//! agents under evaluation, judges each agent run either inline or later
//! from observability traces, and keeps per-run pass/fail statistics
//! consistent across concurrent writers.

// Core modules
pub mod agents;
pub mod benchmark;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod judge;
pub mod llm;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod stats;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use engine::{CancelOutcome, EvalEngine};
pub use error::{AgentError, JudgeError, LlmError, TraceError};
pub use runner::{RunError, RunEvent};
pub use storage::StoreError;
