//! Library facade over the evaluation engine.
//!
//! [`EvalEngine`] wires the store, agents, judge, trace-polling pipeline and
//! cancellation registry together and exposes the operations the CLI (or an
//! embedding service) needs.

use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::agents::AgentRegistry;
use crate::benchmark::{
    apply_benchmark_update, apply_test_case_update, new_benchmark, new_run, snapshot_test_cases,
    Benchmark, BenchmarkUpdate, RunStats, RunStatus, TestCase, TestCaseUpdate, VersioningError,
};
use crate::config::EngineConfig;
use crate::judge::{
    HttpTraceSource, Judge, LlmJudge, PollingConfig, TracePollingPipeline, TraceSource,
    UnconfiguredJudge, UnconfiguredTraceSource,
};
use crate::llm::LiteLlmClient;
use crate::metrics::MetricsCollector;
use crate::report::{EvaluationReport, ReportUpdate};
use crate::runner::{
    CancellationRegistry, ExecuteOptions, ProgressEmitter, RunError, RunEvent, RunOrchestrator,
};
use crate::stats::StatsService;
use crate::storage::{EvalStore, MemoryStore, SqliteStore};

const ORPHAN_CANCEL_REASON: &str = "run cancelled before test case started";

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The run was running and is now cancelled.
    Cancelled,
    /// The run had already reached a terminal status; nothing changed.
    AlreadyFinished,
    /// No run with that id exists.
    NotFound,
}

/// Entry point for running benchmarks and reading their results.
#[derive(Clone)]
pub struct EvalEngine {
    store: EvalStore,
    orchestrator: Arc<RunOrchestrator>,
    pipeline: TracePollingPipeline,
    stats: StatsService,
    cancellations: CancellationRegistry,
    progress_buffer: usize,
    metrics: MetricsCollector,
}

impl EvalEngine {
    pub fn new(
        store: EvalStore,
        agents: AgentRegistry,
        traces: Arc<dyn TraceSource>,
        judge: Arc<dyn Judge>,
        polling: PollingConfig,
    ) -> Self {
        let pipeline =
            TracePollingPipeline::new(store.clone(), traces, Arc::clone(&judge), polling);
        let orchestrator = Arc::new(RunOrchestrator::new(
            store.clone(),
            agents,
            judge,
            pipeline.clone(),
        ));
        Self {
            stats: StatsService::new(store.clone()),
            store,
            orchestrator,
            pipeline,
            cancellations: CancellationRegistry::new(),
            progress_buffer: 64,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_progress_buffer(mut self, buffer: usize) -> Self {
        self.progress_buffer = buffer;
        self
    }

    /// Builds an engine from configuration.
    ///
    /// `database_url` of `memory` selects an in-process store. Without a
    /// trace endpoint or LLM base URL the corresponding collaborator fails
    /// every call, which surfaces as `error` reports.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, RunError> {
        config.validate()?;

        let store = if config.database_url == "memory" {
            EvalStore::new(Arc::new(MemoryStore::new()))
        } else {
            EvalStore::new(Arc::new(SqliteStore::open(&config.database_url).await?))
        }
        .with_max_conflict_retries(config.max_conflict_retries);

        let traces: Arc<dyn TraceSource> = match &config.trace_endpoint {
            Some(endpoint) => Arc::new(HttpTraceSource::new(endpoint.clone())),
            None => {
                warn!("No trace endpoint configured; trace-mode reports cannot be judged");
                Arc::new(UnconfiguredTraceSource)
            }
        };

        let judge: Arc<dyn Judge> = match &config.llm_api_base {
            Some(api_base) => {
                let model = config.judge_model.clone().unwrap_or_default();
                let client = LiteLlmClient::new(
                    api_base.clone(),
                    config.llm_api_key.clone(),
                    if model.is_empty() {
                        "gpt-4o".to_string()
                    } else {
                        model.clone()
                    },
                );
                Arc::new(LlmJudge::new(Arc::new(client), model))
            }
            None => {
                warn!("No LLM endpoint configured; judgments will fail");
                Arc::new(UnconfiguredJudge)
            }
        };

        info!(
            database_url = %config.database_url,
            agents = config.agents.len(),
            "Evaluation engine configured"
        );

        Ok(Self::new(
            store,
            AgentRegistry::from_endpoints(&config.agents),
            traces,
            judge,
            PollingConfig::from_engine(config),
        )
        .with_progress_buffer(config.progress_buffer))
    }

    pub fn store(&self) -> &EvalStore {
        &self.store
    }

    pub fn pipeline(&self) -> &TracePollingPipeline {
        &self.pipeline
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    // Runs

    /// Creates a run of `benchmark_id` and executes it in the background.
    ///
    /// Returns the run id and its progress stream. The stream ends after the
    /// terminal event.
    pub async fn start_run(
        &self,
        benchmark_id: &str,
        agent_key: &str,
        model_id: &str,
        name: Option<String>,
    ) -> Result<(String, ReceiverStream<RunEvent>), RunError> {
        let benchmark = self
            .store
            .get_benchmark(benchmark_id)
            .await?
            .ok_or_else(|| RunError::BenchmarkNotFound(benchmark_id.to_string()))?;
        self.orchestrator.agents().get(agent_key)?;

        let test_cases = self.store.get_test_cases(&benchmark.test_case_ids).await?;
        let snapshots = snapshot_test_cases(&benchmark, &test_cases)?;
        let run = new_run(&benchmark, agent_key, model_id, snapshots, name);
        self.store.add_run(&benchmark.id, &run).await?;

        let run_id = run.id.clone();
        let guard = self.cancellations.register(run_id.clone());
        let (emitter, stream) = ProgressEmitter::channel(self.progress_buffer);
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(async move {
            let options = ExecuteOptions::new(guard.token().clone());
            // Failures are persisted on the run and sent as the terminal event.
            let _ = orchestrator
                .execute_run(&benchmark, run, &emitter, options)
                .await;
            drop(guard);
        });

        Ok((run_id, stream))
    }

    /// Cancels a run. Safe to call any number of times.
    ///
    /// A running run without an orchestrator in this process is cancelled
    /// in storage directly, its unstarted test cases failed and its stats
    /// recomputed.
    pub async fn cancel_run(&self, run_id: &str) -> Result<CancelOutcome, RunError> {
        let token_fired = self.cancellations.cancel(run_id);

        let Some(benchmark) = self.store.find_run(run_id).await? else {
            return Ok(CancelOutcome::NotFound);
        };

        let outcome = match self.store.mark_run_cancelled(&benchmark.id, run_id).await? {
            None => CancelOutcome::NotFound,
            Some(RunStatus::Running) => {
                if !token_fired {
                    self.store
                        .fail_unstarted_results(&benchmark.id, run_id, ORPHAN_CANCEL_REASON)
                        .await?;
                    self.stats.refresh_run(&benchmark.id, run_id).await?;
                    self.metrics.record_run(&RunStatus::Cancelled.to_string());
                }
                CancelOutcome::Cancelled
            }
            Some(_) => CancelOutcome::AlreadyFinished,
        };

        info!(
            run_id = run_id,
            outcome = ?outcome,
            in_process = token_fired,
            "Cancel requested"
        );
        Ok(outcome)
    }

    // Stats

    pub async fn refresh_run_stats(
        &self,
        benchmark_id: &str,
        run_id: &str,
    ) -> Result<Option<RunStats>, RunError> {
        Ok(self.stats.refresh_run(benchmark_id, run_id).await?)
    }

    pub async fn refresh_all_stats(
        &self,
        benchmark_id: &str,
    ) -> Result<Vec<(String, RunStats)>, RunError> {
        if self.store.get_benchmark(benchmark_id).await?.is_none() {
            return Err(RunError::BenchmarkNotFound(benchmark_id.to_string()));
        }
        Ok(self.stats.refresh_all(benchmark_id).await?)
    }

    // Benchmarks

    /// Reads a benchmark, repairing stale run stats on the way.
    pub async fn get_benchmark(&self, id: &str) -> Result<Benchmark, RunError> {
        let mut benchmark = self
            .store
            .get_benchmark(id)
            .await?
            .ok_or_else(|| RunError::BenchmarkNotFound(id.to_string()))?;
        self.stats.backfill(&mut benchmark).await?;
        Ok(benchmark)
    }

    /// Lists benchmarks with the same stats repair as [`Self::get_benchmark`].
    pub async fn list_benchmarks(&self) -> Result<Vec<Benchmark>, RunError> {
        let mut benchmarks = self.store.list_benchmarks().await?;
        for benchmark in &mut benchmarks {
            self.stats.backfill(benchmark).await?;
        }
        Ok(benchmarks)
    }

    /// Creates a version-1 benchmark over existing test cases.
    pub async fn create_benchmark(
        &self,
        name: &str,
        description: Option<String>,
        test_case_ids: Vec<String>,
    ) -> Result<Benchmark, RunError> {
        self.ensure_test_cases_exist(&test_case_ids).await?;
        let benchmark = new_benchmark(name, description, test_case_ids)?;
        self.store.create_benchmark(&benchmark).await?;
        info!(benchmark_id = %benchmark.id, name = name, "Benchmark created");
        Ok(benchmark)
    }

    pub async fn update_benchmark(
        &self,
        id: &str,
        update: BenchmarkUpdate,
    ) -> Result<Benchmark, RunError> {
        if let Some(ids) = &update.test_case_ids {
            self.ensure_test_cases_exist(ids).await?;
        }

        let mut rejected: Option<VersioningError> = None;
        let benchmark = self
            .store
            .update_benchmark(id, |benchmark| {
                rejected = None;
                match apply_benchmark_update(benchmark, update.clone()) {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        rejected = Some(e);
                        Ok(false)
                    }
                }
            })
            .await
            .map_err(|e| not_found_as(e, || RunError::BenchmarkNotFound(id.to_string())))?;

        if let Some(e) = rejected {
            return Err(e.into());
        }
        info!(
            benchmark_id = id,
            version = benchmark.current_version,
            "Benchmark updated"
        );
        Ok(benchmark)
    }

    // Test cases

    pub async fn create_test_case(&self, test_case: &TestCase) -> Result<(), RunError> {
        self.store.create_test_case(test_case).await?;
        Ok(())
    }

    pub async fn get_test_case(&self, id: &str) -> Result<TestCase, RunError> {
        self.store
            .get_test_case(id)
            .await?
            .ok_or_else(|| RunError::TestCaseNotFound(id.to_string()))
    }

    pub async fn update_test_case(
        &self,
        id: &str,
        update: TestCaseUpdate,
    ) -> Result<TestCase, RunError> {
        self.store
            .update_test_case(id, |test_case| {
                apply_test_case_update(test_case, update.clone());
                Ok(true)
            })
            .await
            .map_err(|e| not_found_as(e, || RunError::TestCaseNotFound(id.to_string())))
    }

    // Reports

    /// Reads a report, starting a poller for it if it still awaits traces
    /// and none is running.
    pub async fn get_report(&self, id: &str) -> Result<EvaluationReport, RunError> {
        let report = self
            .store
            .get_report(id)
            .await?
            .ok_or_else(|| RunError::ReportNotFound(id.to_string()))?;
        if self.pipeline.ensure_polling(&report) {
            info!(report_id = id, "Resumed trace polling on read");
        }
        Ok(report)
    }

    /// Applies `update` to a report; a `metricsStatus` change recomputes the
    /// owning run's stats.
    pub async fn update_report(
        &self,
        id: &str,
        update: ReportUpdate,
    ) -> Result<EvaluationReport, RunError> {
        let mut status_changed = false;
        let report = self
            .store
            .update_report(id, |report| {
                status_changed = update.apply(report);
                Ok(true)
            })
            .await
            .map_err(|e| not_found_as(e, || RunError::ReportNotFound(id.to_string())))?;

        if status_changed {
            self.stats.refresh_for_report(&report).await?;
            self.pipeline.ensure_polling(&report);
        }
        Ok(report)
    }

    /// Starts pollers for every report still awaiting traces.
    pub async fn resume_pending_polls(&self) -> Result<usize, RunError> {
        Ok(self.pipeline.resume_pending().await?)
    }

    /// Waits until every trace poller of this process has finished.
    pub async fn wait_for_judgments(&self) {
        self.pipeline.wait_idle().await;
    }

    async fn ensure_test_cases_exist(&self, ids: &[String]) -> Result<(), RunError> {
        let found = self.store.get_test_cases(ids).await?;
        match ids.iter().find(|id| !found.contains_key(*id)) {
            Some(missing) => Err(VersioningError::UnknownTestCase(missing.clone()).into()),
            None => Ok(()),
        }
    }
}

fn not_found_as(error: crate::storage::StoreError, mapped: impl FnOnce() -> RunError) -> RunError {
    if error.is_not_found() {
        mapped()
    } else {
        error.into()
    }
}
