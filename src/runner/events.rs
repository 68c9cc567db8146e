//! Progress events streamed while a run executes.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::benchmark::{BenchmarkRun, ResultStatus, TestCaseSnapshot};

/// One event on a run's progress stream.
///
/// A stream carries `Started`, zero or more `Progress`, then exactly one of
/// `Completed`, `Cancelled` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        run_id: String,
        test_cases: Vec<TestCaseSnapshot>,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        current_test_case_index: usize,
        total_test_cases: usize,
        test_case_id: String,
        status: ResultStatus,
    },
    Completed {
        run: BenchmarkRun,
    },
    Cancelled {
        run: BenchmarkRun,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        run_id: String,
    },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Completed { .. } | RunEvent::Cancelled { .. } | RunEvent::Error { .. }
        )
    }
}

/// Sending half of a progress stream.
///
/// Sends never fail the run: once the consumer is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: Option<mpsc::Sender<RunEvent>>,
}

impl ProgressEmitter {
    /// Creates an emitter and the stream it feeds.
    pub fn channel(buffer: usize) -> (Self, ReceiverStream<RunEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, ReceiverStream::new(rx))
    }

    /// Emitter that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let (emitter, mut stream) = ProgressEmitter::channel(8);
        emitter
            .emit(RunEvent::Started {
                run_id: "run-1".to_string(),
                test_cases: Vec::new(),
            })
            .await;
        emitter
            .emit(RunEvent::Error {
                error: "boom".to_string(),
                run_id: "run-1".to_string(),
            })
            .await;
        drop(emitter);

        let events: Vec<RunEvent> = (&mut stream).collect().await;
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_terminal());
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_emit_after_consumer_dropped() {
        let (emitter, stream) = ProgressEmitter::channel(1);
        drop(stream);
        emitter
            .emit(RunEvent::Error {
                error: "ignored".to_string(),
                run_id: "run-1".to_string(),
            })
            .await;
        ProgressEmitter::disabled()
            .emit(RunEvent::Error {
                error: "ignored".to_string(),
                run_id: "run-1".to_string(),
            })
            .await;
    }

    #[test]
    fn test_progress_wire_format() {
        let event = RunEvent::Progress {
            current_test_case_index: 1,
            total_test_cases: 3,
            test_case_id: "tc-b".to_string(),
            status: ResultStatus::Completed,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "progress");
        assert_eq!(value["currentTestCaseIndex"], 1);
        assert_eq!(value["totalTestCases"], 3);
        assert_eq!(value["status"], "completed");
    }
}
