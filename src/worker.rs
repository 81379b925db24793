//! In-process evaluation dispatch.
//!
//! The [`EvaluationBroker`] is the producer side: anything that wants a job
//! reconciled enqueues an [`Evaluation`]. The [`EvaluationWorker`] drains the
//! queue one evaluation at a time and routes each to the scheduler for its job
//! type, so at most one evaluation per job is ever in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchError, Result};
use crate::models::Evaluation;
use crate::scheduler::{Scheduler, SchedulerProvider};
use crate::store::JobStore;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_EVAL_ATTEMPTS: u32 = 5;

/// Cloneable handle for submitting evaluations to the worker.
#[derive(Debug, Clone)]
pub struct EvaluationBroker {
    tx: mpsc::Sender<Evaluation>,
}

impl EvaluationBroker {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Evaluation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an evaluation. One with a future `wait_until` is held back on a
    /// timer and delivered once due. Must be called from within a tokio runtime.
    pub fn enqueue(&self, evaluation: Evaluation) -> Result<()> {
        if self.tx.is_closed() {
            return Err(OrchError::QueueClosed);
        }

        let delay = evaluation
            .wait_until
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);

        if delay.is_zero() {
            match self.tx.try_send(evaluation) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(OrchError::QueueClosed),
                Err(mpsc::error::TrySendError::Full(evaluation)) => {
                    tracing::warn!(eval_id = %evaluation.id, "Evaluation queue full, delivering in background");
                    self.spawn_delivery(evaluation, Duration::ZERO);
                    return Ok(());
                }
            }
        }

        tracing::debug!(
            eval_id = %evaluation.id,
            job_id = %evaluation.job_id,
            delay_ms = delay.as_millis() as u64,
            "Evaluation deferred"
        );
        self.spawn_delivery(evaluation, delay);
        Ok(())
    }

    fn spawn_delivery(&self, evaluation: Evaluation, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let eval_id = evaluation.id.clone();
            if tx.send(evaluation).await.is_err() {
                tracing::debug!(eval_id = %eval_id, "Evaluation queue closed before delivery");
            }
        });
    }
}

/// Outcome of handling one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalOutcome {
    Processed,
    Requeued,
    Failed,
}

pub struct EvaluationWorker {
    provider: Arc<SchedulerProvider>,
    store: Arc<dyn JobStore>,
    broker: EvaluationBroker,
    max_attempts: u32,
    attempts: HashMap<String, u32>,
}

impl EvaluationWorker {
    pub fn new(
        provider: Arc<SchedulerProvider>,
        store: Arc<dyn JobStore>,
        broker: EvaluationBroker,
    ) -> Self {
        Self {
            provider,
            store,
            broker,
            max_attempts: DEFAULT_MAX_EVAL_ATTEMPTS,
            attempts: HashMap::new(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Process evaluations until `shutdown` fires or every broker is dropped.
    ///
    /// An evaluation interrupted by shutdown is abandoned; since its plan is
    /// only submitted at the very end, nothing of it is applied.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Evaluation>, shutdown: CancellationToken) {
        tracing::info!("Evaluation worker started");
        loop {
            let evaluation = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(evaluation) => evaluation,
                    None => break,
                },
            };

            let eval_id = evaluation.id.clone();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(eval_id = %eval_id, "Shutdown during evaluation, abandoning");
                    break;
                }
                _ = self.handle(evaluation) => {}
            }
        }
        tracing::info!("Evaluation worker stopped");
    }

    /// Process a single evaluation, re-enqueuing it when the failure is one a
    /// fresh attempt can fix.
    pub async fn handle(&mut self, evaluation: Evaluation) -> EvalOutcome {
        let result = self.provider.process(&evaluation).await;
        match result {
            Ok(()) => {
                self.attempts.remove(&evaluation.id);
                self.forget(&evaluation).await;
                EvalOutcome::Processed
            }
            Err(e) if e.is_condition_violation() || e.is_transient() => {
                let attempts = self.attempts.entry(evaluation.id.clone()).or_insert(0);
                *attempts += 1;
                if *attempts >= self.max_attempts {
                    tracing::error!(
                        eval_id = %evaluation.id,
                        job_id = %evaluation.job_id,
                        attempts = *attempts,
                        error = %e,
                        "Evaluation failed repeatedly, giving up"
                    );
                    self.attempts.remove(&evaluation.id);
                    return EvalOutcome::Failed;
                }
                tracing::warn!(
                    eval_id = %evaluation.id,
                    job_id = %evaluation.job_id,
                    attempt = *attempts,
                    error = %e,
                    "Evaluation hit a retryable error, re-enqueuing"
                );
                let eval_id = evaluation.id.clone();
                match self.broker.enqueue(evaluation) {
                    Ok(()) => EvalOutcome::Requeued,
                    Err(e) => {
                        tracing::error!(eval_id = %eval_id, error = %e, "Failed to re-enqueue evaluation");
                        self.attempts.remove(&eval_id);
                        EvalOutcome::Failed
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    eval_id = %evaluation.id,
                    job_id = %evaluation.job_id,
                    error = %e,
                    "Evaluation failed"
                );
                self.attempts.remove(&evaluation.id);
                EvalOutcome::Failed
            }
        }
    }

    /// Drop a persisted deferred evaluation once it has been handled.
    async fn forget(&self, evaluation: &Evaluation) {
        if !evaluation.is_deferred_retry() {
            return;
        }
        match self.store.delete_evaluation(&evaluation.id).await {
            Ok(()) | Err(OrchError::EvaluationNotFound(_)) => {}
            Err(e) => {
                tracing::warn!(eval_id = %evaluation.id, error = %e, "Failed to delete evaluation");
            }
        }
    }
}
