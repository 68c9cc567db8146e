//! Benchmark definitions, runs and the versioning layer.
//!
//! - **types**: the `Benchmark` document with its nested `BenchmarkRun`s,
//!   per-test-case results, run stats and `TestCase` definitions
//! - **versioning**: version bumps on test case membership changes and
//!   run-time snapshots of the test cases a run executes against

pub mod types;
pub mod versioning;

pub use types::{
    Benchmark, BenchmarkRun, BenchmarkVersion, ResultStatus, RunStats, RunStatus, TestCase,
    TestCaseResult, TestCaseSnapshot,
};
pub use versioning::{
    apply_benchmark_update, apply_test_case_update, new_benchmark, new_run, snapshot_test_cases,
    test_case_set_changed, BenchmarkUpdate, TestCaseUpdate, VersioningError,
};
