//! Applying plans to the job store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{OrchError, Result};
use crate::models::{
    ExecutionAction, ExecutionDesiredState, ExecutionDesiredStateType, ExecutionState,
    ExecutionStateType, JobStateType, Plan,
};
use crate::store::{
    ExecutionChanges, JobDeferral, JobStore, UpdateExecutionCondition, UpdateExecutionRequest,
    UpdateJobCondition, UpdateJobStateRequest, WriteBatch,
};
use crate::worker::EvaluationBroker;

const APPROVED_MESSAGE: &str = "execution approved by orchestrator";

/// Consumes the plans produced by schedulers.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn process(&self, plan: &Plan) -> Result<()>;
}

/// Commits each plan to a [`JobStore`] as one atomic batch, conditioned on the
/// revisions the plan was computed against, then hands any deferred
/// evaluations to the broker.
pub struct StorePlanner {
    store: Arc<dyn JobStore>,
    broker: Option<EvaluationBroker>,
}

impl StorePlanner {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: EvaluationBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    fn build_batch(plan: &Plan) -> Result<WriteBatch> {
        let mut batch = WriteBatch {
            new_executions: plan.new_executions.clone(),
            ..Default::default()
        };

        for (id, update) in &plan.updated_executions {
            if update.execution.id != *id || update.execution.job_id != plan.job_id {
                return Err(OrchError::Internal(format!(
                    "plan for job {} references mismatched execution {}",
                    plan.job_id, id
                )));
            }
            let condition = UpdateExecutionCondition {
                expected_revision: update.execution.revision,
                unexpected_states: ExecutionStateType::TERMINAL.to_vec(),
                ..Default::default()
            };
            let (changes, comment) = match update.action {
                ExecutionAction::Approved => (
                    ExecutionChanges {
                        desired_state: Some(
                            ExecutionDesiredState::new(ExecutionDesiredStateType::Running)
                                .with_message(APPROVED_MESSAGE),
                        ),
                        ..Default::default()
                    },
                    APPROVED_MESSAGE.to_string(),
                ),
                ExecutionAction::Stopped(reason) => (
                    ExecutionChanges {
                        desired_state: Some(
                            ExecutionDesiredState::new(ExecutionDesiredStateType::Stopped)
                                .with_message(reason.message()),
                        ),
                        compute_state: Some(
                            ExecutionState::new(ExecutionStateType::Cancelled)
                                .with_message(reason.message()),
                        ),
                        ..Default::default()
                    },
                    reason.message().to_string(),
                ),
            };
            batch.execution_updates.push(UpdateExecutionRequest {
                execution_id: id.clone(),
                condition,
                changes,
                comment,
            });
        }

        if let Some(new_state) = plan.desired_job_state {
            batch.job_update = Some(UpdateJobStateRequest {
                job_id: plan.job_id.clone(),
                condition: UpdateJobCondition {
                    expected_revision: plan.job.revision,
                    unexpected_states: JobStateType::TERMINAL.to_vec(),
                    ..Default::default()
                },
                new_state,
                message: plan.job_state_message.clone(),
            });
        }

        for evaluation in &plan.new_evaluations {
            if let Some(wait_until) = evaluation.wait_until {
                batch.deferrals.push(JobDeferral {
                    job_id: evaluation.job_id.clone(),
                    wait_until,
                    comment: format!("evaluation {} deferred", evaluation.id),
                });
            }
            batch.new_evaluations.push(evaluation.clone());
        }

        Ok(batch)
    }
}

#[async_trait]
impl Planner for StorePlanner {
    async fn process(&self, plan: &Plan) -> Result<()> {
        if plan.is_empty() {
            tracing::debug!(eval_id = %plan.eval_id, job_id = %plan.job_id, "Empty plan, nothing to apply");
            return Ok(());
        }

        let batch = Self::build_batch(plan)?;
        self.store.commit(batch).await?;

        tracing::info!(
            eval_id = %plan.eval_id,
            job_id = %plan.job_id,
            created = plan.new_executions.len(),
            approved = plan.approved_ids().len(),
            stopped = plan.stopped_ids().len(),
            job_state = ?plan.desired_job_state,
            deferred = plan.new_evaluations.len(),
            "Plan applied"
        );

        if let Some(broker) = &self.broker {
            for evaluation in &plan.new_evaluations {
                broker.enqueue(evaluation.clone())?;
            }
        }
        Ok(())
    }
}
