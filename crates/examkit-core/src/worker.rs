//! Runs a scoring engine on its own task, isolated from the interactive side.
//!
//! Answer updates are fire-and-forget; snapshot and finalize are calls that
//! carry a deadline. A finalize that misses its deadline is a failure the
//! caller must handle with a fallback, not something to retry inline.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ScoringError;
use crate::model::{Answer, EvaluationSnapshot, FinalizeMetadata, SealedSubmission};
use crate::scoring::ProgressiveScoringEngine;

enum Command {
    Update {
        question_id: String,
        answer: Option<Answer>,
    },
    Snapshot {
        reply: oneshot::Sender<EvaluationSnapshot>,
    },
    Finalize {
        metadata: FinalizeMetadata,
        reply: oneshot::Sender<SealedSubmission>,
    },
}

/// Cloneable handle to a running scoring worker.
#[derive(Clone)]
pub struct ScoringHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// Owner of the scoring task.
pub struct ScoringWorker {
    handle: ScoringHandle,
    task: JoinHandle<()>,
}

impl ScoringWorker {
    /// Move `engine` onto a new task and return the worker owning it.
    pub fn spawn(engine: ProgressiveScoringEngine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(engine, rx));
        Self {
            handle: ScoringHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> ScoringHandle {
        self.handle.clone()
    }

    /// Stop the task without finalizing.
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn run(mut engine: ProgressiveScoringEngine, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Update {
                question_id,
                answer,
            } => {
                if let Err(e) = engine.update_answer(&question_id, answer) {
                    tracing::warn!(exam_id = %engine.exam_id(), %question_id, error = %e, "answer update rejected");
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(engine.snapshot().clone());
            }
            Command::Finalize { metadata, reply } => {
                let sealed = engine.finalize(metadata);
                let _ = reply.send(sealed);
                break;
            }
        }
    }
    tracing::debug!(exam_id = %engine.exam_id(), "scoring worker stopped");
}

impl ScoringHandle {
    /// Queue an answer change. Never blocks; rejected answers are logged.
    pub fn update_answer(&self, question_id: impl Into<String>, answer: Option<Answer>) {
        let cmd = Command::Update {
            question_id: question_id.into(),
            answer,
        };
        if self.tx.send(cmd).is_err() {
            tracing::warn!("answer update dropped: scoring worker is not running");
        }
    }

    /// Current running evaluation.
    pub async fn snapshot(&self, timeout: Duration) -> Result<EvaluationSnapshot, ScoringError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .map_err(|_| ScoringError::WorkerClosed)?;
        await_reply(rx, timeout).await
    }

    /// Seal the submission. The worker stops after answering.
    pub async fn finalize(
        &self,
        metadata: FinalizeMetadata,
        timeout: Duration,
    ) -> Result<SealedSubmission, ScoringError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Finalize { metadata, reply })
            .map_err(|_| ScoringError::WorkerClosed)?;
        await_reply(rx, timeout).await
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<T>, timeout: Duration) -> Result<T, ScoringError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(ScoringError::WorkerClosed),
        Err(_) => Err(ScoringError::FinalizeTimeout(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityKey;
    use crate::scoring::tests::sample_exam;
    use crate::scoring::ScoringConfig;

    fn spawn_worker() -> ScoringWorker {
        let engine = ProgressiveScoringEngine::initialize(
            sample_exam(),
            ScoringConfig::default(),
            IntegrityKey::new("worker-secret"),
        )
        .unwrap();
        ScoringWorker::spawn(engine)
    }

    #[tokio::test]
    async fn updates_are_applied_in_order() {
        let worker = spawn_worker();
        let handle = worker.handle();
        handle.update_answer("q1", Some(Answer::Choice("A".into())));
        handle.update_answer("q1", Some(Answer::Choice("B".into())));
        handle.update_answer("q3", Some(Answer::Numeric(9.81)));

        let snap = handle.snapshot(Duration::from_secs(1)).await.unwrap();
        assert_eq!(snap.running_score, 8.0);
        assert_eq!(snap.correct, 2);
    }

    #[tokio::test]
    async fn rejected_update_does_not_stop_worker() {
        let worker = spawn_worker();
        let handle = worker.handle();
        handle.update_answer("missing", Some(Answer::Choice("A".into())));
        handle.update_answer("q1", Some(Answer::Choice("B".into())));
        let sealed = handle
            .finalize(FinalizeMetadata::default(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(sealed.final_score, 4.0);
        assert!(IntegrityKey::new("worker-secret").verify(&sealed).is_ok());
    }

    #[tokio::test]
    async fn calls_after_finalize_report_closed_worker() {
        let worker = spawn_worker();
        let handle = worker.handle();
        handle
            .finalize(FinalizeMetadata::default(), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        let err = handle
            .finalize(FinalizeMetadata::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::WorkerClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        // The sender stays alive, so the receiver never resolves.
        let (_tx, rx) = oneshot::channel::<u32>();
        let err = await_reply(rx, Duration::from_millis(250)).await.unwrap_err();
        assert!(matches!(err, ScoringError::FinalizeTimeout(250)));
    }
}
