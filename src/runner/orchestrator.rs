//! Run orchestrator: executes one benchmark run end to end.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::cancellation::CancellationToken;
use super::events::{ProgressEmitter, RunEvent};
use crate::agents::{AgentClient, AgentRegistry, AgentRequest, AgentResponse};
use crate::benchmark::{
    Benchmark, BenchmarkRun, RunStatus, TestCase, TestCaseResult, TestCaseSnapshot,
    VersioningError,
};
use crate::config::ConfigError;
use crate::error::AgentError;
use crate::judge::{Judge, JudgeRequest, PipelineError, TracePollingPipeline};
use crate::metrics::MetricsCollector;
use crate::report::EvaluationReport;
use crate::stats::StatsService;
use crate::storage::{EvalStore, StoreError};

/// `traceError` of a trace-mode report whose agent returned no run id.
pub const MISSING_RUN_ID_ERROR: &str = "agent returned no run id for trace correlation";

const CANCELLED_BEFORE_START: &str = "run cancelled before test case started";
const NOT_EXECUTED: &str = "test case was not executed";

/// Errors surfaced by run execution and the engine facade.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Benchmark '{0}' not found")]
    BenchmarkNotFound(String),

    #[error("Report '{0}' not found")]
    ReportNotFound(String),

    #[error("Test case '{0}' not found")]
    TestCaseNotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Versioning(#[from] VersioningError),

    #[error("Trace pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Callback invoked after each test case result has been persisted.
pub type TestCaseHook = Arc<dyn Fn(&str, &TestCaseResult) + Send + Sync>;

/// Per-call options of [`RunOrchestrator::execute_run`].
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub cancellation: CancellationToken,
    pub on_test_case_complete: Option<TestCaseHook>,
}

impl ExecuteOptions {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            on_test_case_complete: None,
        }
    }

    pub fn with_test_case_hook(mut self, hook: TestCaseHook) -> Self {
        self.on_test_case_complete = Some(hook);
        self
    }
}

/// Drives test cases through the agent and finalizes the run.
pub struct RunOrchestrator {
    store: EvalStore,
    agents: AgentRegistry,
    judge: Arc<dyn Judge>,
    pipeline: TracePollingPipeline,
    stats: StatsService,
    metrics: MetricsCollector,
}

impl RunOrchestrator {
    pub fn new(
        store: EvalStore,
        agents: AgentRegistry,
        judge: Arc<dyn Judge>,
        pipeline: TracePollingPipeline,
    ) -> Self {
        Self {
            stats: StatsService::new(store.clone()),
            store,
            agents,
            judge,
            pipeline,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Executes `run` (already stored under `benchmark`) and returns the
    /// finalized run.
    ///
    /// The run always ends persisted as `completed`, `cancelled` or
    /// `failed`; the progress stream always ends with one terminal event.
    pub async fn execute_run(
        &self,
        benchmark: &Benchmark,
        run: BenchmarkRun,
        progress: &ProgressEmitter,
        options: ExecuteOptions,
    ) -> Result<BenchmarkRun, RunError> {
        let started = Instant::now();
        info!(
            benchmark_id = %benchmark.id,
            run_id = %run.id,
            agent_key = %run.agent_key,
            model_id = %run.model_id,
            test_cases = run.test_case_snapshots.len(),
            "Starting benchmark run"
        );

        progress
            .emit(RunEvent::Started {
                run_id: run.id.clone(),
                test_cases: run.test_case_snapshots.clone(),
            })
            .await;

        let outcome = match self.run_test_cases(benchmark, &run, progress, &options).await {
            Ok(current) => self.finalize(benchmark, current, &options).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(finished) => {
                info!(
                    run_id = %finished.id,
                    status = %finished.status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Benchmark run finished"
                );
                self.metrics.record_run(&finished.status.to_string());
                let event = if finished.status == RunStatus::Cancelled {
                    RunEvent::Cancelled {
                        run: finished.clone(),
                    }
                } else {
                    RunEvent::Completed {
                        run: finished.clone(),
                    }
                };
                progress.emit(event).await;
                Ok(finished)
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "Benchmark run failed");
                self.persist_failure(&benchmark.id, &run.id, &e.to_string())
                    .await;
                self.metrics.record_run(&RunStatus::Failed.to_string());
                progress
                    .emit(RunEvent::Error {
                        error: e.to_string(),
                        run_id: run.id.clone(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Runs every test case in snapshot order, stopping early on
    /// cancellation. Returns the run as last persisted.
    async fn run_test_cases(
        &self,
        benchmark: &Benchmark,
        run: &BenchmarkRun,
        progress: &ProgressEmitter,
        options: &ExecuteOptions,
    ) -> Result<BenchmarkRun, RunError> {
        let agent = self.agents.get(&run.agent_key)?;
        let ids: Vec<String> = run
            .test_case_snapshots
            .iter()
            .map(|s| s.id.clone())
            .collect();
        let test_cases = self.store.get_test_cases(&ids).await?;
        let total = run.test_case_snapshots.len();

        let mut current = run.clone();
        for (index, snapshot) in run.test_case_snapshots.iter().enumerate() {
            if options.cancellation.is_cancelled() {
                info!(
                    run_id = %run.id,
                    remaining = total - index,
                    "Cancellation observed, stopping run"
                );
                break;
            }

            let result = match test_cases.get(&snapshot.id) {
                Some(test_case) => {
                    self.execute_test_case(benchmark, run, agent.as_ref(), test_case, snapshot)
                        .await?
                }
                None => {
                    warn!(run_id = %run.id, test_case_id = %snapshot.id, "Test case disappeared");
                    TestCaseResult::failed(format!("test case '{}' not found", snapshot.id))
                }
            };

            current = self
                .store
                .record_result(&benchmark.id, &run.id, &snapshot.id, &result)
                .await?;
            self.metrics.record_test_case(&result.status.to_string());

            if let Some(hook) = &options.on_test_case_complete {
                hook(&snapshot.id, &result);
            }

            if current.status == RunStatus::Cancelled && !options.cancellation.is_cancelled() {
                info!(run_id = %run.id, "Run cancelled in storage");
                options.cancellation.cancel();
            }

            progress
                .emit(RunEvent::Progress {
                    current_test_case_index: index + 1,
                    total_test_cases: total,
                    test_case_id: snapshot.id.clone(),
                    status: result.status,
                })
                .await;
        }

        Ok(current)
    }

    /// Invokes the agent for one test case and stores its report.
    ///
    /// Agent failures scoped to the test case become a `failed` result;
    /// failures of the agent interface as a whole abort the run.
    async fn execute_test_case(
        &self,
        benchmark: &Benchmark,
        run: &BenchmarkRun,
        agent: &dyn AgentClient,
        test_case: &TestCase,
        snapshot: &TestCaseSnapshot,
    ) -> Result<TestCaseResult, RunError> {
        debug!(run_id = %run.id, test_case_id = %test_case.id, "Invoking agent");

        let request = AgentRequest {
            agent_key: run.agent_key.clone(),
            model_id: run.model_id.clone(),
            test_case: test_case.clone(),
        };

        let response = match agent.invoke(request).await {
            Ok(response) => response,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(
                    run_id = %run.id,
                    test_case_id = %test_case.id,
                    error = %e,
                    "Agent invocation failed"
                );
                return Ok(TestCaseResult::failed(e.to_string()));
            }
        };

        let report = EvaluationReport::new(&test_case.id, &run.agent_key, &run.model_id)
            .with_test_case_version(snapshot.version)
            .with_owner(&benchmark.id, &run.id);

        let report = if agent.trace_mode() {
            trace_mode_report(report, response)
        } else {
            self.judge_inline(report, test_case, response).await
        };

        self.store.create_report(&report).await?;
        if report.awaiting_traces() {
            self.pipeline.ensure_polling(&report);
        }

        Ok(TestCaseResult::completed(report.id))
    }

    async fn judge_inline(
        &self,
        report: EvaluationReport,
        test_case: &TestCase,
        response: AgentResponse,
    ) -> EvaluationReport {
        let mut report = report.with_trajectory(response.trajectory);
        let started = Instant::now();
        let verdict = self
            .judge
            .judge(JudgeRequest::new(test_case, report.trajectory.clone()))
            .await;
        self.metrics
            .record_judge_latency(started.elapsed().as_secs_f64());

        match verdict {
            Ok(verdict) => verdict.apply_to(&mut report),
            Err(e) => {
                warn!(test_case_id = %test_case.id, error = %e, "Inline judgment failed");
                report.mark_error(format!("judge failed: {}", e));
            }
        }
        report
    }

    /// Resolves unstarted results, computes stats and replaces the run slot.
    async fn finalize(
        &self,
        benchmark: &Benchmark,
        mut run: BenchmarkRun,
        options: &ExecuteOptions,
    ) -> Result<BenchmarkRun, RunError> {
        let cancelled =
            options.cancellation.is_cancelled() || run.status == RunStatus::Cancelled;

        let reason = if cancelled {
            CANCELLED_BEFORE_START
        } else {
            NOT_EXECUTED
        };
        let converted = run.fail_unstarted(reason);
        if converted > 0 {
            debug!(run_id = %run.id, converted = converted, "Unstarted test cases failed");
        }

        run.stats = Some(self.stats.compute_for_run(&run).await?);
        run.status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        run.completed_at = Some(Utc::now());

        Ok(self.store.finalize_run(&benchmark.id, &run).await?)
    }

    /// Best-effort write of the `failed` terminal state.
    async fn persist_failure(&self, benchmark_id: &str, run_id: &str, message: &str) {
        let written = self
            .store
            .update_benchmark(benchmark_id, |benchmark| {
                let Some(run) = benchmark.run_mut(run_id) else {
                    return Ok(false);
                };
                run.fail_unstarted(message);
                run.status = RunStatus::Failed;
                run.error = Some(message.to_string());
                run.completed_at.get_or_insert_with(Utc::now);
                Ok(true)
            })
            .await;

        let benchmark = match written {
            Ok(benchmark) => benchmark,
            Err(e) => {
                error!(run_id = run_id, error = %e, "Failed to persist run failure");
                return;
            }
        };

        if let Some(run) = benchmark.run(run_id) {
            match self.stats.compute_for_run(run).await {
                Ok(stats) => {
                    if let Err(e) = self.store.set_run_stats(benchmark_id, run_id, stats).await {
                        warn!(run_id = run_id, error = %e, "Failed to store stats of failed run");
                    }
                }
                Err(e) => warn!(run_id = run_id, error = %e, "Failed to compute stats of failed run"),
            }
        }
    }
}

fn trace_mode_report(report: EvaluationReport, response: AgentResponse) -> EvaluationReport {
    let report = report.with_trajectory(response.trajectory);
    match response.run_id.filter(|id| !id.is_empty()) {
        Some(run_id) => report.with_run_id(run_id),
        None => {
            let mut report = report;
            report.mark_error(MISSING_RUN_ID_ERROR);
            report
        }
    }
}
