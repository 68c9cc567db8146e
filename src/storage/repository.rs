//! Typed access to benchmarks, test cases and reports.
//!
//! Every mutation of an existing document goes through [`EvalStore::update`],
//! a read-modify-compare-and-swap loop. Callers pass a script that edits
//! only the subtree they own (one run slot, one result entry), so concurrent
//! writers never clobber each other.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::document::{DocumentStore, StoreError};
use super::memory::MemoryStore;
use crate::benchmark::{Benchmark, BenchmarkRun, RunStats, RunStatus, TestCase, TestCaseResult};
use crate::metrics::MetricsCollector;
use crate::report::EvaluationReport;

pub const BENCHMARKS: &str = "benchmarks";
pub const REPORTS: &str = "reports";
pub const TEST_CASES: &str = "test_cases";

/// Default number of retries after a version conflict.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 10;

/// Typed facade over a [`DocumentStore`].
#[derive(Clone)]
pub struct EvalStore {
    inner: Arc<dyn DocumentStore>,
    max_conflict_retries: u32,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for EvalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalStore")
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl EvalStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            metrics: MetricsCollector::new(),
        }
    }

    /// Store backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.inner.get(collection, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
            None => Ok(None),
        }
    }

    async fn create<T: Serialize>(&self, collection: &str, id: &str, doc: &T) -> Result<(), StoreError> {
        self.inner
            .create(collection, id, serde_json::to_value(doc)?)
            .await?;
        Ok(())
    }

    async fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        self.inner
            .list(collection)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(StoreError::from))
            .collect()
    }

    /// Applies `script` to the current document and writes it back with
    /// compare-and-swap, retrying on version conflicts.
    ///
    /// The script returns `Ok(false)` to skip the write. It may run several
    /// times, each time against a freshly read document.
    pub async fn update<T, F>(&self, collection: &str, id: &str, mut script: F) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(&mut T) -> Result<bool, StoreError> + Send,
    {
        let attempts = self.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            let current = self
                .inner
                .get(collection, id)
                .await?
                .ok_or_else(|| StoreError::not_found(collection, id))?;

            let mut doc: T = serde_json::from_value(current.body)?;
            if !script(&mut doc)? {
                return Ok(doc);
            }

            let body = serde_json::to_value(&doc)?;
            if self
                .inner
                .compare_and_swap(collection, id, current.version, body)
                .await?
                .is_some()
            {
                return Ok(doc);
            }

            self.metrics.record_store_conflict(collection);
            debug!(
                collection = collection,
                id = id,
                attempt = attempt,
                "Version conflict, retrying update"
            );
        }

        Err(StoreError::ConflictRetriesExhausted {
            collection: collection.to_string(),
            id: id.to_string(),
            attempts,
        })
    }

    // Benchmarks

    pub async fn create_benchmark(&self, benchmark: &Benchmark) -> Result<(), StoreError> {
        self.create(BENCHMARKS, &benchmark.id, benchmark).await
    }

    pub async fn get_benchmark(&self, id: &str) -> Result<Option<Benchmark>, StoreError> {
        self.get(BENCHMARKS, id).await
    }

    pub async fn list_benchmarks(&self) -> Result<Vec<Benchmark>, StoreError> {
        self.list(BENCHMARKS).await
    }

    pub async fn update_benchmark<F>(&self, id: &str, script: F) -> Result<Benchmark, StoreError>
    where
        F: FnMut(&mut Benchmark) -> Result<bool, StoreError> + Send,
    {
        self.update(BENCHMARKS, id, script).await
    }

    /// Appends a new run to a benchmark.
    pub async fn add_run(&self, benchmark_id: &str, run: &BenchmarkRun) -> Result<(), StoreError> {
        self.update_benchmark(benchmark_id, |benchmark| {
            if benchmark.run(&run.id).is_some() {
                return Err(StoreError::AlreadyExists {
                    collection: "runs".to_string(),
                    id: run.id.clone(),
                });
            }
            benchmark.runs.push(run.clone());
            Ok(true)
        })
        .await?;
        Ok(())
    }

    /// Writes one test case result into a run, leaving every other field of
    /// the run untouched.
    ///
    /// Returns the run as persisted after the write.
    pub async fn record_result(
        &self,
        benchmark_id: &str,
        run_id: &str,
        test_case_id: &str,
        result: &TestCaseResult,
    ) -> Result<BenchmarkRun, StoreError> {
        let benchmark = self
            .update_benchmark(benchmark_id, |benchmark| {
                let run = benchmark
                    .run_mut(run_id)
                    .ok_or_else(|| StoreError::not_found("runs", run_id))?;
                run.results.insert(test_case_id.to_string(), result.clone());
                Ok(true)
            })
            .await?;

        benchmark
            .run(run_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("runs", run_id))
    }

    /// Replaces the slot of `run` with its finalized form.
    ///
    /// A run that was cancelled in storage while finishing stays cancelled.
    /// Returns the run as persisted.
    pub async fn finalize_run(
        &self,
        benchmark_id: &str,
        run: &BenchmarkRun,
    ) -> Result<BenchmarkRun, StoreError> {
        let benchmark = self
            .update_benchmark(benchmark_id, |benchmark| {
                let slot = benchmark
                    .run_mut(&run.id)
                    .ok_or_else(|| StoreError::not_found("runs", &run.id))?;
                let cancelled_externally =
                    slot.status == RunStatus::Cancelled && run.status == RunStatus::Completed;
                *slot = run.clone();
                if cancelled_externally {
                    slot.status = RunStatus::Cancelled;
                }
                Ok(true)
            })
            .await?;

        benchmark
            .run(&run.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("runs", &run.id))
    }

    /// Moves a `running` run to `cancelled`.
    ///
    /// Returns the status the run had before, or `None` if the run does not
    /// exist in this benchmark.
    pub async fn mark_run_cancelled(
        &self,
        benchmark_id: &str,
        run_id: &str,
    ) -> Result<Option<RunStatus>, StoreError> {
        let mut previous = None;
        self.update_benchmark(benchmark_id, |benchmark| {
            previous = None;
            let Some(run) = benchmark.run_mut(run_id) else {
                return Ok(false);
            };
            previous = Some(run.status);
            if run.status != RunStatus::Running {
                return Ok(false);
            }
            run.status = RunStatus::Cancelled;
            Ok(true)
        })
        .await?;
        Ok(previous)
    }

    /// Converts every unstarted result of a terminal run to `failed` and
    /// stores fresh stats.
    ///
    /// Used when a cancelled run has no live orchestrator to finalize it.
    pub async fn fail_unstarted_results(
        &self,
        benchmark_id: &str,
        run_id: &str,
        reason: &str,
    ) -> Result<usize, StoreError> {
        let mut converted = 0;
        self.update_benchmark(benchmark_id, |benchmark| {
            let run = benchmark
                .run_mut(run_id)
                .ok_or_else(|| StoreError::not_found("runs", run_id))?;
            converted = run.fail_unstarted(reason);
            if converted > 0 && run.completed_at.is_none() {
                run.completed_at = Some(chrono::Utc::now());
            }
            Ok(converted > 0)
        })
        .await?;
        Ok(converted)
    }

    /// Stores `stats` on a run. Skips the write when nothing changed.
    pub async fn set_run_stats(
        &self,
        benchmark_id: &str,
        run_id: &str,
        stats: RunStats,
    ) -> Result<bool, StoreError> {
        let mut changed = false;
        self.update_benchmark(benchmark_id, |benchmark| {
            let run = benchmark
                .run_mut(run_id)
                .ok_or_else(|| StoreError::not_found("runs", run_id))?;
            changed = run.stats != Some(stats);
            run.stats = Some(stats);
            Ok(changed)
        })
        .await?;
        Ok(changed)
    }

    /// Finds the benchmark that owns `run_id`.
    pub async fn find_run(&self, run_id: &str) -> Result<Option<Benchmark>, StoreError> {
        Ok(self
            .list_benchmarks()
            .await?
            .into_iter()
            .find(|b| b.run(run_id).is_some()))
    }

    /// Finds the `(benchmark_id, run_id)` whose results reference `report_id`.
    pub async fn find_report_owner(
        &self,
        report_id: &str,
    ) -> Result<Option<(String, String)>, StoreError> {
        for benchmark in self.list_benchmarks().await? {
            for run in &benchmark.runs {
                let references = run
                    .results
                    .values()
                    .any(|r| r.report_id.as_deref() == Some(report_id));
                if references {
                    return Ok(Some((benchmark.id.clone(), run.id.clone())));
                }
            }
        }
        Ok(None)
    }

    // Reports

    pub async fn create_report(&self, report: &EvaluationReport) -> Result<(), StoreError> {
        self.create(REPORTS, &report.id, report).await
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<EvaluationReport>, StoreError> {
        self.get(REPORTS, id).await
    }

    pub async fn list_reports(&self) -> Result<Vec<EvaluationReport>, StoreError> {
        self.list(REPORTS).await
    }

    /// Fetches every report referenced by `run`, keyed by report id.
    pub async fn reports_for_run(
        &self,
        run: &BenchmarkRun,
    ) -> Result<HashMap<String, EvaluationReport>, StoreError> {
        let mut reports = HashMap::new();
        for report_id in run.results.values().filter_map(|r| r.report_id.as_deref()) {
            if let Some(report) = self.get_report(report_id).await? {
                reports.insert(report.id.clone(), report);
            }
        }
        Ok(reports)
    }

    pub async fn update_report<F>(&self, id: &str, script: F) -> Result<EvaluationReport, StoreError>
    where
        F: FnMut(&mut EvaluationReport) -> Result<bool, StoreError> + Send,
    {
        self.update(REPORTS, id, script).await
    }

    // Test cases

    pub async fn create_test_case(&self, test_case: &TestCase) -> Result<(), StoreError> {
        self.create(TEST_CASES, &test_case.id, test_case).await
    }

    pub async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>, StoreError> {
        self.get(TEST_CASES, id).await
    }

    /// Fetches the listed test cases. Ids that do not resolve are absent
    /// from the returned map.
    pub async fn get_test_cases(&self, ids: &[String]) -> Result<HashMap<String, TestCase>, StoreError> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(test_case) = self.get_test_case(id).await? {
                found.insert(id.clone(), test_case);
            }
        }
        Ok(found)
    }

    pub async fn update_test_case<F>(&self, id: &str, script: F) -> Result<TestCase, StoreError>
    where
        F: FnMut(&mut TestCase) -> Result<bool, StoreError> + Send,
    {
        self.update(TEST_CASES, id, script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::{new_benchmark, new_run, ResultStatus};
    use crate::storage::document::StoredDocument;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn seeded() -> (EvalStore, Benchmark, BenchmarkRun) {
        let store = EvalStore::in_memory();
        let ids = vec!["tc-a".to_string(), "tc-b".to_string()];
        let benchmark = new_benchmark("bench", None, ids).expect("benchmark");
        store.create_benchmark(&benchmark).await.expect("create");
        let run = new_run(&benchmark, "agent", "model", Vec::new(), None);
        store.add_run(&benchmark.id, &run).await.expect("add run");
        (store, benchmark, run)
    }

    #[tokio::test]
    async fn test_record_result_touches_only_its_entry() {
        let (store, benchmark, run) = seeded().await;

        let persisted = store
            .record_result(&benchmark.id, &run.id, "tc-a", &TestCaseResult::completed("r-1"))
            .await
            .expect("record");
        assert_eq!(persisted.results["tc-a"].status, ResultStatus::Completed);
        assert_eq!(persisted.results["tc-b"].status, ResultStatus::Pending);
    }

    #[tokio::test]
    async fn test_finalize_keeps_external_cancellation() {
        let (store, benchmark, mut run) = seeded().await;

        let previous = store
            .mark_run_cancelled(&benchmark.id, &run.id)
            .await
            .expect("cancel");
        assert_eq!(previous, Some(RunStatus::Running));

        run.status = RunStatus::Completed;
        let persisted = store.finalize_run(&benchmark.id, &run).await.expect("finalize");
        assert_eq!(persisted.status, RunStatus::Cancelled);

        let again = store
            .mark_run_cancelled(&benchmark.id, &run.id)
            .await
            .expect("cancel");
        assert_eq!(again, Some(RunStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_set_run_stats_reports_change() {
        let (store, benchmark, run) = seeded().await;
        let stats = RunStats {
            passed: 1,
            failed: 1,
            pending: 0,
            total: 2,
        };
        assert!(store.set_run_stats(&benchmark.id, &run.id, stats).await.expect("set"));
        assert!(!store.set_run_stats(&benchmark.id, &run.id, stats).await.expect("set"));
    }

    #[tokio::test]
    async fn test_find_report_owner() {
        let (store, benchmark, run) = seeded().await;
        store
            .record_result(&benchmark.id, &run.id, "tc-b", &TestCaseResult::completed("r-9"))
            .await
            .expect("record");

        let owner = store.find_report_owner("r-9").await.expect("scan");
        assert_eq!(owner, Some((benchmark.id.clone(), run.id.clone())));
        assert!(store.find_report_owner("r-unknown").await.expect("scan").is_none());
    }

    /// Store whose compare-and-swap always loses.
    struct AlwaysConflicting {
        inner: MemoryStore,
        swaps: AtomicU32,
    }

    #[async_trait]
    impl DocumentStore for AlwaysConflicting {
        async fn get(&self, c: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
            self.inner.get(c, id).await
        }
        async fn create(&self, c: &str, id: &str, body: Value) -> Result<StoredDocument, StoreError> {
            self.inner.create(c, id, body).await
        }
        async fn replace(&self, c: &str, id: &str, body: Value) -> Result<StoredDocument, StoreError> {
            self.inner.replace(c, id, body).await
        }
        async fn compare_and_swap(
            &self,
            _c: &str,
            _id: &str,
            _expected: u64,
            _body: Value,
        ) -> Result<Option<StoredDocument>, StoreError> {
            self.swaps.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
        async fn list(&self, c: &str) -> Result<Vec<StoredDocument>, StoreError> {
            self.inner.list(c).await
        }
    }

    #[tokio::test]
    async fn test_conflict_retries_exhausted() {
        let backend = Arc::new(AlwaysConflicting {
            inner: MemoryStore::new(),
            swaps: AtomicU32::new(0),
        });
        let store = EvalStore::new(backend.clone()).with_max_conflict_retries(3);
        let test_case = TestCase::new("tc-1", "name", "prompt");
        store.create_test_case(&test_case).await.expect("create");

        let err = store
            .update_test_case("tc-1", |tc| {
                tc.name = "renamed".to_string();
                Ok(true)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::ConflictRetriesExhausted { attempts: 4, .. }
        ));
        assert_eq!(backend.swaps.load(Ordering::SeqCst), 4);
    }
}
