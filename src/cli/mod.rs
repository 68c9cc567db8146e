//! Command-line interface for bench-forge.
//!
//! Provides commands for importing benchmarks, executing and cancelling
//! runs, refreshing statistics and inspecting reports.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
