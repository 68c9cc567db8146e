//! CLI command definitions for bench-forge.
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::benchmark::{TestCase, TestCaseUpdate};
use crate::config::EngineConfig;
use crate::engine::{CancelOutcome, EvalEngine};
use crate::metrics::{export_metrics, init_metrics};
use crate::report::TrajectoryStep;
use crate::runner::RunEvent;

/// Benchmark execution engine with trace-judged evaluation.
#[derive(Parser)]
#[command(name = "bench-forge")]
#[command(about = "Run agent benchmarks and judge them from responses or traces")]
#[command(version)]
#[command(
    long_about = "bench-forge executes benchmark runs against AI agents, judges each agent run inline or from observability traces, and keeps run statistics consistent.\n\nExample usage:\n  bench-forge import support.yaml\n  bench-forge run --benchmark bench-... --agent support-bot --model gpt-4o --wait"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file.
    #[arg(short, long, env = "BENCH_FORGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create test cases and a benchmark from a YAML file.
    Import(ImportArgs),

    /// Execute a benchmark run, streaming progress events as JSON lines.
    Run(RunArgs),

    /// Cancel a benchmark run.
    Cancel(CancelArgs),

    /// Recompute run statistics of a benchmark.
    #[command(name = "refresh-stats")]
    RefreshStats(RefreshStatsArgs),

    /// Restart trace polling for every pending report.
    Resume(ResumeArgs),

    /// Show an evaluation report.
    Report(ReportArgs),

    /// Show a benchmark with its runs, or list benchmarks.
    Show(ShowArgs),
}

/// Arguments for `bench-forge import`.
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// YAML file with a benchmark and its test cases.
    pub file: PathBuf,
}

/// Arguments for `bench-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Benchmark to run.
    #[arg(short, long)]
    pub benchmark: String,

    /// Key of the configured agent to evaluate.
    #[arg(short, long)]
    pub agent: String,

    /// Model the agent should use.
    #[arg(short, long)]
    pub model: String,

    /// Optional display name of the run.
    #[arg(long)]
    pub name: Option<String>,

    /// Wait for trace-mode judgments before exiting.
    #[arg(short, long)]
    pub wait: bool,

    /// Print Prometheus metrics to stderr when done.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `bench-forge cancel`.
#[derive(Parser, Debug)]
pub struct CancelArgs {
    /// Run to cancel.
    pub run_id: String,
}

/// Arguments for `bench-forge refresh-stats`.
#[derive(Parser, Debug)]
pub struct RefreshStatsArgs {
    /// Benchmark whose runs are refreshed.
    pub benchmark: String,

    /// Only refresh this run.
    #[arg(long)]
    pub run: Option<String>,
}

/// Arguments for `bench-forge resume`.
#[derive(Parser, Debug)]
pub struct ResumeArgs {
    /// Return after starting the pollers instead of waiting for them.
    #[arg(long)]
    pub no_wait: bool,
}

/// Arguments for `bench-forge report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Report to show.
    pub report_id: String,

    /// If the report is still pending, wait for its judgment.
    #[arg(short, long)]
    pub wait: bool,
}

/// Arguments for `bench-forge show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Benchmark to show; lists all benchmarks when omitted.
    pub benchmark: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let engine = EvalEngine::from_config(&config)
        .await
        .context("Failed to start evaluation engine")?;

    match cli.command {
        Commands::Import(args) => run_import_command(&engine, args).await,
        Commands::Run(args) => run_run_command(&engine, args).await,
        Commands::Cancel(args) => run_cancel_command(&engine, args).await,
        Commands::RefreshStats(args) => run_refresh_stats_command(&engine, args).await,
        Commands::Resume(args) => run_resume_command(&engine, args).await,
        Commands::Report(args) => run_report_command(&engine, args).await,
        Commands::Show(args) => run_show_command(&engine, args).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Import
// ============================================================================

/// Shape of an import file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportFile {
    name: String,
    #[serde(default)]
    description: Option<String>,
    test_cases: Vec<ImportedTestCase>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportedTestCase {
    id: String,
    name: String,
    prompt: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    context: Vec<String>,
    #[serde(default)]
    expected_outcomes: Vec<String>,
    #[serde(default)]
    expected_trajectory: Option<Vec<TrajectoryStep>>,
}

fn load_import_file(path: &Path) -> anyhow::Result<ImportFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("Invalid import file {}", path.display()))
}

async fn run_import_command(engine: &EvalEngine, args: ImportArgs) -> anyhow::Result<()> {
    let file = load_import_file(&args.file)?;

    let mut ids = Vec::with_capacity(file.test_cases.len());
    for imported in file.test_cases {
        ids.push(imported.id.clone());
        let exists = engine.store().get_test_case(&imported.id).await?.is_some();
        if exists {
            let updated = engine
                .update_test_case(
                    &imported.id,
                    TestCaseUpdate {
                        name: Some(imported.name),
                        description: imported.description,
                        prompt: Some(imported.prompt),
                        context: Some(imported.context),
                        expected_outcomes: Some(imported.expected_outcomes),
                        expected_trajectory: imported.expected_trajectory,
                    },
                )
                .await?;
            info!(test_case_id = %updated.id, version = updated.version, "Test case updated");
        } else {
            let mut test_case = TestCase::new(imported.id, imported.name, imported.prompt)
                .with_context(imported.context)
                .with_expected_outcomes(imported.expected_outcomes);
            test_case.description = imported.description;
            test_case.expected_trajectory = imported.expected_trajectory;
            engine.create_test_case(&test_case).await?;
            info!(test_case_id = %test_case.id, "Test case created");
        }
    }

    let benchmark = engine
        .create_benchmark(&file.name, file.description, ids)
        .await?;
    print_json(&benchmark)
}

// ============================================================================
// Run
// ============================================================================

async fn run_run_command(engine: &EvalEngine, args: RunArgs) -> anyhow::Result<()> {
    let (run_id, mut events) = engine
        .start_run(&args.benchmark, &args.agent, &args.model, args.name)
        .await?;
    info!(run_id = %run_id, "Run started");

    let mut failed = None;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if let RunEvent::Error { error, .. } = &event {
            failed = Some(error.clone());
        }
    }

    if args.wait {
        info!("Waiting for pending judgments");
        engine.wait_for_judgments().await;
        let benchmark = engine.get_benchmark(&args.benchmark).await?;
        if let Some(run) = benchmark.run(&run_id) {
            println!("{}", serde_json::to_string(run)?);
        }
    }

    if args.metrics {
        eprint!("{}", export_metrics());
    }

    match failed {
        Some(error) => anyhow::bail!("Run {} failed: {}", run_id, error),
        None => Ok(()),
    }
}

// ============================================================================
// Cancel / stats / resume
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelOutput {
    run_id: String,
    outcome: CancelOutcome,
}

async fn run_cancel_command(engine: &EvalEngine, args: CancelArgs) -> anyhow::Result<()> {
    let outcome = engine.cancel_run(&args.run_id).await?;
    print_json(&CancelOutput {
        run_id: args.run_id,
        outcome,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshedRun {
    run_id: String,
    stats: Option<crate::benchmark::RunStats>,
}

async fn run_refresh_stats_command(
    engine: &EvalEngine,
    args: RefreshStatsArgs,
) -> anyhow::Result<()> {
    let refreshed: Vec<RefreshedRun> = match args.run {
        Some(run_id) => {
            let stats = engine.refresh_run_stats(&args.benchmark, &run_id).await?;
            vec![RefreshedRun { run_id, stats }]
        }
        None => engine
            .refresh_all_stats(&args.benchmark)
            .await?
            .into_iter()
            .map(|(run_id, stats)| RefreshedRun {
                run_id,
                stats: Some(stats),
            })
            .collect(),
    };
    print_json(&refreshed)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResumeOutput {
    resumed: usize,
    waited: bool,
}

async fn run_resume_command(engine: &EvalEngine, args: ResumeArgs) -> anyhow::Result<()> {
    let resumed = engine.resume_pending_polls().await?;
    if !args.no_wait {
        engine.wait_for_judgments().await;
    }
    print_json(&ResumeOutput {
        resumed,
        waited: !args.no_wait,
    })
}

// ============================================================================
// Read commands
// ============================================================================

async fn run_report_command(engine: &EvalEngine, args: ReportArgs) -> anyhow::Result<()> {
    let mut report = engine.get_report(&args.report_id).await?;
    if args.wait && engine.pipeline().is_polling(&report.id) {
        engine.wait_for_judgments().await;
        report = engine.get_report(&args.report_id).await?;
    }
    print_json(&report)
}

async fn run_show_command(engine: &EvalEngine, args: ShowArgs) -> anyhow::Result<()> {
    match args.benchmark {
        Some(id) => print_json(&engine.get_benchmark(&id).await?),
        None => print_json(&engine.list_benchmarks().await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "bench-forge",
            "run",
            "--benchmark",
            "bench-1",
            "--agent",
            "support-bot",
            "--model",
            "gpt-4o",
            "--wait",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.benchmark, "bench-1");
                assert_eq!(args.agent, "support-bot");
                assert!(args.wait);
                assert!(!args.metrics);
            }
            _ => panic!("expected run command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_refresh_stats_command() {
        let cli = Cli::try_parse_from(["bench-forge", "refresh-stats", "bench-1", "--run", "run-1"])
            .expect("parse");
        match cli.command {
            Commands::RefreshStats(args) => {
                assert_eq!(args.benchmark, "bench-1");
                assert_eq!(args.run.as_deref(), Some("run-1"));
            }
            _ => panic!("expected refresh-stats command"),
        }
    }

    #[test]
    fn test_import_file_shape() {
        let raw = r#"
name: Support
description: Customer support flows
testCases:
  - id: refund
    name: Refund
    prompt: Refund order A-1
    expectedOutcomes:
      - refund issued for A-1
  - id: lookup
    name: Lookup
    prompt: Where is order B-2?
"#;
        let file: ImportFile = serde_yaml::from_str(raw).expect("parse");
        assert_eq!(file.name, "Support");
        assert_eq!(file.test_cases.len(), 2);
        assert_eq!(file.test_cases[0].expected_outcomes, vec!["refund issued for A-1"]);
        assert!(file.test_cases[1].context.is_empty());
    }

    #[tokio::test]
    async fn test_import_creates_benchmark() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bench.yaml");
        fs::write(
            &path,
            "name: Support\ntestCases:\n  - id: refund\n    name: Refund\n    prompt: Refund A-1\n",
        )
        .expect("write");

        let config = EngineConfig::new().with_database_url("memory");
        let engine = EvalEngine::from_config(&config).await.expect("engine");
        run_import_command(&engine, ImportArgs { file: path })
            .await
            .expect("import");

        let benchmarks = engine.list_benchmarks().await.expect("list");
        assert_eq!(benchmarks.len(), 1);
        assert_eq!(benchmarks[0].test_case_ids, vec!["refund"]);
    }
}
