//! Trace-polling judge pipeline.
//!
//! Each `pending` trace-mode report gets at most one poller in this process.
//! A poller waits `poll_interval`, bumps and persists `traceFetchAttempts`,
//! then asks the [`TraceSource`] for the run's spans. Once spans appear the
//! trajectory is rebuilt from them and judged; after `max_attempts` empty
//! polls the report is marked `error`. Everything a poller needs is read
//! back from the stored report, so a restarted process resumes at attempt
//! `k + 1`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use super::traces::TraceSource;
use super::{Judge, JudgeRequest, JudgeVerdict};
use crate::config::EngineConfig;
use crate::metrics::{MetricsCollector, PollOutcome};
use crate::report::{trajectory_from_spans, EvaluationReport, MetricsStatus, Span};
use crate::stats::StatsService;
use crate::storage::{EvalStore, StoreError};

/// Errors raised while driving a report through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Report '{0}' not found")]
    ReportNotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Polling schedule and concurrency bound.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub max_concurrent_pollers: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_attempts: 20,
            max_concurrent_pollers: 16,
        }
    }
}

impl PollingConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_attempts: config.max_trace_attempts,
            max_concurrent_pollers: config.max_concurrent_pollers,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_max_concurrent_pollers(mut self, pollers: usize) -> Self {
        self.max_concurrent_pollers = pollers;
        self
    }
}

struct PipelineInner {
    store: EvalStore,
    traces: Arc<dyn TraceSource>,
    judge: Arc<dyn Judge>,
    stats: StatsService,
    config: PollingConfig,
    active: Mutex<HashSet<String>>,
    idle: Notify,
    permits: Arc<Semaphore>,
    metrics: MetricsCollector,
}

impl PipelineInner {
    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every in-flight trace poller of the process.
#[derive(Clone)]
pub struct TracePollingPipeline {
    inner: Arc<PipelineInner>,
}

/// Releases a report's poller slot when the poller ends, however it ends.
struct PollerGuard {
    inner: Arc<PipelineInner>,
    report_id: String,
}

impl Drop for PollerGuard {
    fn drop(&mut self) {
        self.inner.active().remove(&self.report_id);
        self.inner.metrics.dec_active_pollers();
        self.inner.idle.notify_waiters();
    }
}

impl TracePollingPipeline {
    pub fn new(
        store: EvalStore,
        traces: Arc<dyn TraceSource>,
        judge: Arc<dyn Judge>,
        config: PollingConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_pollers.max(1)));
        Self {
            inner: Arc::new(PipelineInner {
                stats: StatsService::new(store.clone()),
                store,
                traces,
                judge,
                config,
                active: Mutex::new(HashSet::new()),
                idle: Notify::new(),
                permits,
                metrics: MetricsCollector::new(),
            }),
        }
    }

    pub fn is_polling(&self, report_id: &str) -> bool {
        self.inner.active().contains(report_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }

    /// Starts a poller for `report` unless it is not awaiting traces or a
    /// poller already owns it.
    ///
    /// Returns true if a new poller was spawned.
    pub fn ensure_polling(&self, report: &EvaluationReport) -> bool {
        if !report.awaiting_traces() {
            return false;
        }

        let guard = {
            let mut active = self.inner.active();
            if !active.insert(report.id.clone()) {
                debug!(report_id = %report.id, "Poller already running");
                return false;
            }
            self.inner.metrics.inc_active_pollers();
            PollerGuard {
                inner: Arc::clone(&self.inner),
                report_id: report.id.clone(),
            }
        };

        info!(
            report_id = %report.id,
            attempt = report.attempts(),
            "Starting trace poller"
        );

        let pipeline = self.clone();
        tokio::spawn(async move {
            let report_id = guard.report_id.clone();
            let Ok(_permit) = Arc::clone(&pipeline.inner.permits).acquire_owned().await else {
                return;
            };
            let outcome = pipeline.drive(&report_id).await;
            drop(guard);
            match outcome {
                Ok(status) => info!(report_id = %report_id, status = %status, "Trace poller finished"),
                Err(e) => error!(report_id = %report_id, error = %e, "Trace poller aborted"),
            }
        });

        true
    }

    /// Starts pollers for every stored report still awaiting traces.
    ///
    /// Returns how many pollers were started.
    pub async fn resume_pending(&self) -> Result<usize, PipelineError> {
        let mut started = 0;
        for report in self.inner.store.list_reports().await? {
            if self.ensure_polling(&report) {
                started += 1;
            }
        }
        if started > 0 {
            info!(count = started, "Resumed pending trace pollers");
        }
        Ok(started)
    }

    /// Waits until no poller is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Runs the polling state machine for one report until it leaves
    /// `pending`. Returns the final metrics status.
    async fn drive(&self, report_id: &str) -> Result<MetricsStatus, PipelineError> {
        let inner = &self.inner;
        let max_attempts = inner.config.max_attempts;

        loop {
            let report = inner
                .store
                .get_report(report_id)
                .await?
                .ok_or_else(|| PipelineError::ReportNotFound(report_id.to_string()))?;

            if report.metrics_status != MetricsStatus::Pending {
                return Ok(report.metrics_status);
            }

            let Some(run_id) = report.run_id.clone().filter(|id| !id.is_empty()) else {
                return self
                    .finish_with_error(report_id, "report has no run id to correlate traces")
                    .await;
            };

            let previous = report.attempts();
            if previous >= max_attempts {
                inner.metrics.record_trace_poll(PollOutcome::Exhausted);
                warn!(report_id = report_id, attempts = previous, "Giving up on traces");
                return self
                    .finish_with_error(
                        report_id,
                        &format!("traces not found after {} attempts", previous),
                    )
                    .await;
            }

            tokio::time::sleep(inner.config.poll_interval).await;

            let attempt = previous + 1;
            let persisted = inner
                .store
                .update_report(report_id, |r| {
                    if r.metrics_status != MetricsStatus::Pending {
                        return Ok(false);
                    }
                    r.trace_fetch_attempts = Some(r.attempts().max(attempt));
                    r.updated_at = Utc::now();
                    Ok(true)
                })
                .await?;

            if persisted.metrics_status != MetricsStatus::Pending {
                return Ok(persisted.metrics_status);
            }

            match inner.traces.fetch_spans(&run_id).await {
                Ok(spans) if !spans.is_empty() => {
                    inner.metrics.record_trace_poll(PollOutcome::Found);
                    info!(
                        report_id = report_id,
                        attempt = attempt,
                        spans = spans.len(),
                        "Traces found"
                    );
                    return self.judge_and_finish(&persisted, &spans).await;
                }
                Ok(_) => {
                    inner.metrics.record_trace_poll(PollOutcome::Empty);
                    debug!(report_id = report_id, attempt = attempt, "No spans yet");
                }
                Err(e) => {
                    inner.metrics.record_trace_poll(PollOutcome::FetchError);
                    warn!(
                        report_id = report_id,
                        attempt = attempt,
                        error = %e,
                        "Trace fetch failed"
                    );
                }
            }
        }
    }

    async fn judge_and_finish(
        &self,
        report: &EvaluationReport,
        spans: &[Span],
    ) -> Result<MetricsStatus, PipelineError> {
        let inner = &self.inner;
        let trajectory = trajectory_from_spans(spans);

        let outcome: Result<JudgeVerdict, String> =
            match inner.store.get_test_case(&report.test_case_id).await? {
                None => Err(format!("test case '{}' not found", report.test_case_id)),
                Some(test_case) => {
                    let started = Instant::now();
                    let verdict = inner
                        .judge
                        .judge(JudgeRequest::new(&test_case, trajectory.clone()))
                        .await
                        .map_err(|e| format!("judge failed: {}", e));
                    inner
                        .metrics
                        .record_judge_latency(started.elapsed().as_secs_f64());
                    verdict
                }
            };

        let finished = inner
            .store
            .update_report(&report.id, |r| {
                if r.metrics_status != MetricsStatus::Pending {
                    return Ok(false);
                }
                r.trajectory = trajectory.clone();
                match &outcome {
                    Ok(verdict) => verdict.apply_to(r),
                    Err(message) => r.mark_error(message.clone()),
                }
                Ok(true)
            })
            .await?;

        if let Err(message) = &outcome {
            warn!(report_id = %report.id, error = %message, "Report judged as error");
        }

        self.after_terminal(&finished).await;
        Ok(finished.metrics_status)
    }

    async fn finish_with_error(
        &self,
        report_id: &str,
        message: &str,
    ) -> Result<MetricsStatus, PipelineError> {
        let finished = self
            .inner
            .store
            .update_report(report_id, |r| {
                if r.metrics_status != MetricsStatus::Pending {
                    return Ok(false);
                }
                r.mark_error(message);
                Ok(true)
            })
            .await?;

        self.after_terminal(&finished).await;
        Ok(finished.metrics_status)
    }

    /// Recomputes the owning run's stats once a report is terminal.
    async fn after_terminal(&self, report: &EvaluationReport) {
        if report.metrics_status == MetricsStatus::Pending {
            return;
        }
        if let Err(e) = self.inner.stats.refresh_for_report(report).await {
            warn!(report_id = %report.id, error = %e, "Failed to refresh run stats");
        }
    }
}
