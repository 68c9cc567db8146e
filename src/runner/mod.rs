//! Benchmark run execution.
//!
//! # Architecture
//!
//! ```text
//! EvalEngine::start_run → RunOrchestrator ─┬→ AgentClient (per test case)
//!                                          ├→ EvalStore   (targeted result writes)
//!                                          ├→ TracePollingPipeline (trace-mode reports)
//!                                          └→ ProgressEmitter → RunEvent stream
//! ```
//!
//! The orchestrator:
//! 1. Emits `started` with the run's test case snapshots
//! 2. Invokes the agent for each test case in order, checking the run's
//!    cancellation token before each one
//! 3. Writes each result as a targeted update of the run's slot
//! 4. Finalizes: fails unstarted test cases, computes stats, persists the
//!    terminal status and emits the terminal event

pub mod cancellation;
pub mod events;
pub mod orchestrator;

pub use cancellation::{CancellationGuard, CancellationRegistry, CancellationToken};
pub use events::{ProgressEmitter, RunEvent};
pub use orchestrator::{ExecuteOptions, RunError, RunOrchestrator, TestCaseHook, MISSING_RUN_ID_ERROR};
