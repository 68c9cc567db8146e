//! Pure pass/fail/pending aggregation.

use std::collections::HashMap;

use crate::benchmark::{BenchmarkRun, ResultStatus, RunStats, RunStatus};
use crate::report::{EvaluationReport, MetricsStatus, PassFailStatus};

/// Derives [`RunStats`] from a run's results and the reports they reference.
///
/// `reports` is keyed by report id. A completed result whose report is
/// missing counts as pending.
pub fn compute_stats(run: &BenchmarkRun, reports: &HashMap<String, EvaluationReport>) -> RunStats {
    let mut stats = RunStats::default();

    for result in run.results.values() {
        stats.total += 1;
        match result.status {
            ResultStatus::Pending | ResultStatus::Running => stats.pending += 1,
            ResultStatus::Failed | ResultStatus::Cancelled => stats.failed += 1,
            ResultStatus::Completed => {
                let report = result.report_id.as_deref().and_then(|id| reports.get(id));
                match report.map(|r| (r.metrics_status, r.pass_fail_status)) {
                    None | Some((MetricsStatus::Pending, _)) => stats.pending += 1,
                    Some((MetricsStatus::Error, _)) => stats.failed += 1,
                    Some((MetricsStatus::Ready, Some(PassFailStatus::Passed))) => {
                        stats.passed += 1
                    }
                    Some((MetricsStatus::Ready, _)) => stats.failed += 1,
                }
            }
        }
    }

    stats
}

/// Whether a run's stored stats should be recomputed when it is read.
pub fn needs_backfill(run: &BenchmarkRun) -> bool {
    if !matches!(run.status, RunStatus::Completed | RunStatus::Cancelled) {
        return false;
    }
    match run.stats {
        None => true,
        Some(stats) => stats.pending > 0 && run.all_results_terminal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::TestCaseResult;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn run_with(results: &[(&str, TestCaseResult)]) -> BenchmarkRun {
        BenchmarkRun {
            id: "run-1".to_string(),
            name: None,
            created_at: Utc::now(),
            completed_at: None,
            agent_key: "agent".to_string(),
            model_id: "model".to_string(),
            status: RunStatus::Completed,
            benchmark_version: 1,
            test_case_snapshots: Vec::new(),
            results: results
                .iter()
                .map(|(id, r)| (id.to_string(), r.clone()))
                .collect::<BTreeMap<_, _>>(),
            stats: None,
            error: None,
        }
    }

    fn report(id: &str, status: MetricsStatus, verdict: Option<PassFailStatus>) -> EvaluationReport {
        let mut report = EvaluationReport::new("tc", "agent", "model");
        report.id = id.to_string();
        report.metrics_status = status;
        report.pass_fail_status = verdict;
        report
    }

    fn index(reports: Vec<EvaluationReport>) -> HashMap<String, EvaluationReport> {
        reports.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    #[test]
    fn test_compute_stats_classification() {
        let run = run_with(&[
            ("a", TestCaseResult::failed("agent down")),
            ("b", TestCaseResult::completed("r-pass")),
            ("c", TestCaseResult::completed("r-fail")),
            ("d", TestCaseResult::completed("r-pending")),
            ("e", TestCaseResult::completed("r-error")),
            ("f", TestCaseResult::completed("r-missing")),
            ("g", TestCaseResult::pending()),
        ]);
        let reports = index(vec![
            report("r-pass", MetricsStatus::Ready, Some(PassFailStatus::Passed)),
            report("r-fail", MetricsStatus::Ready, Some(PassFailStatus::Failed)),
            report("r-pending", MetricsStatus::Pending, None),
            report("r-error", MetricsStatus::Error, None),
        ]);

        let stats = compute_stats(&run, &reports);
        assert_eq!(
            stats,
            RunStats {
                passed: 1,
                failed: 3,
                pending: 3,
                total: 7,
            }
        );
    }

    #[test]
    fn test_ready_without_verdict_is_failed() {
        let run = run_with(&[("a", TestCaseResult::completed("r"))]);
        let reports = index(vec![report("r", MetricsStatus::Ready, None)]);
        assert_eq!(compute_stats(&run, &reports).failed, 1);
    }

    #[test]
    fn test_needs_backfill() {
        let mut run = run_with(&[("a", TestCaseResult::completed("r"))]);
        assert!(needs_backfill(&run));

        run.stats = Some(RunStats {
            passed: 0,
            failed: 0,
            pending: 1,
            total: 1,
        });
        assert!(needs_backfill(&run));

        run.stats = Some(RunStats {
            passed: 1,
            failed: 0,
            pending: 0,
            total: 1,
        });
        assert!(!needs_backfill(&run));

        run.status = RunStatus::Running;
        run.stats = None;
        assert!(!needs_backfill(&run));
    }

    #[test]
    fn test_no_backfill_while_results_unresolved() {
        let mut run = run_with(&[("a", TestCaseResult::pending())]);
        run.status = RunStatus::Cancelled;
        run.stats = Some(RunStats {
            passed: 0,
            failed: 0,
            pending: 1,
            total: 1,
        });
        assert!(!needs_backfill(&run));
    }
}
