//! Stats recompute and backfill against the store.

use tracing::{debug, info};

use super::aggregator::{compute_stats, needs_backfill};
use crate::benchmark::{Benchmark, BenchmarkRun, RunStats, RunStatus};
use crate::report::EvaluationReport;
use crate::storage::{EvalStore, StoreError};

/// Recomputes and persists run stats.
#[derive(Debug, Clone)]
pub struct StatsService {
    store: EvalStore,
}

impl StatsService {
    pub fn new(store: EvalStore) -> Self {
        Self { store }
    }

    /// Computes stats for `run` from the reports currently stored.
    pub async fn compute_for_run(&self, run: &BenchmarkRun) -> Result<RunStats, StoreError> {
        let reports = self.store.reports_for_run(run).await?;
        Ok(compute_stats(run, &reports))
    }

    /// Recomputes and stores stats for one run.
    ///
    /// Running runs are skipped and return `None`: their stats belong to the
    /// orchestrator until finalization.
    pub async fn refresh_run(
        &self,
        benchmark_id: &str,
        run_id: &str,
    ) -> Result<Option<RunStats>, StoreError> {
        let benchmark = self
            .store
            .get_benchmark(benchmark_id)
            .await?
            .ok_or_else(|| StoreError::not_found(crate::storage::BENCHMARKS, benchmark_id))?;
        let run = benchmark
            .run(run_id)
            .ok_or_else(|| StoreError::not_found("runs", run_id))?;

        if run.status == RunStatus::Running {
            debug!(run_id = run_id, "Skipping stats refresh for running run");
            return Ok(None);
        }

        let stats = self.compute_for_run(run).await?;
        if self.store.set_run_stats(benchmark_id, run_id, stats).await? {
            info!(
                benchmark_id = benchmark_id,
                run_id = run_id,
                passed = stats.passed,
                failed = stats.failed,
                pending = stats.pending,
                "Run stats updated"
            );
        }
        Ok(Some(stats))
    }

    /// Refreshes every non-running run of a benchmark.
    pub async fn refresh_all(
        &self,
        benchmark_id: &str,
    ) -> Result<Vec<(String, RunStats)>, StoreError> {
        let benchmark = self
            .store
            .get_benchmark(benchmark_id)
            .await?
            .ok_or_else(|| StoreError::not_found(crate::storage::BENCHMARKS, benchmark_id))?;

        let mut refreshed = Vec::new();
        for run in &benchmark.runs {
            if let Some(stats) = self.refresh_run(benchmark_id, &run.id).await? {
                refreshed.push((run.id.clone(), stats));
            }
        }
        Ok(refreshed)
    }

    /// Applies the read-time backfill to `benchmark` in place, persisting
    /// any recomputed stats.
    ///
    /// Returns the number of runs whose stats changed.
    pub async fn backfill(&self, benchmark: &mut Benchmark) -> Result<usize, StoreError> {
        let mut changed = 0;
        for run in benchmark.runs.iter_mut().filter(|r| needs_backfill(r)) {
            let stats = self.compute_for_run(run).await?;
            if run.stats != Some(stats) {
                self.store
                    .set_run_stats(&benchmark.id, &run.id, stats)
                    .await?;
                debug!(
                    benchmark_id = %benchmark.id,
                    run_id = %run.id,
                    pending = stats.pending,
                    "Backfilled run stats"
                );
                run.stats = Some(stats);
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Recomputes the stats of the run that owns `report`.
    ///
    /// Uses the report's owner fields when present and otherwise scans the
    /// stored benchmarks for a result referencing it.
    pub async fn refresh_for_report(
        &self,
        report: &EvaluationReport,
    ) -> Result<Option<RunStats>, StoreError> {
        let owner = match (&report.benchmark_id, &report.benchmark_run_id) {
            (Some(benchmark_id), Some(run_id)) => Some((benchmark_id.clone(), run_id.clone())),
            _ => self.store.find_report_owner(&report.id).await?,
        };

        match owner {
            Some((benchmark_id, run_id)) => self.refresh_run(&benchmark_id, &run_id).await,
            None => {
                debug!(report_id = %report.id, "Report has no owning run");
                Ok(None)
            }
        }
    }
}
