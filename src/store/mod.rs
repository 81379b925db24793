//! Job store contract.
//!
//! Reads return the current state together with its revision. Every write
//! carries a condition on the state/revision it was computed from and fails
//! atomically, without side effects, when the condition no longer holds.

pub mod memory;
pub mod watch;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ConditionError, Result};
use crate::models::{
    Evaluation, Execution, ExecutionDesiredState, ExecutionState, ExecutionStateType, Job,
    JobHistory, JobStateType,
};

pub use memory::InMemoryJobStore;
pub use watch::{EventType, WatchEvent, WatchStream, WatcherType};

/// Guard for a job state update. Empty fields are not checked; a revision of
/// zero matches any revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateJobCondition {
    pub expected_state: Option<JobStateType>,
    pub unexpected_states: Vec<JobStateType>,
    pub expected_revision: u64,
}

impl UpdateJobCondition {
    pub fn validate(&self, job: &Job) -> std::result::Result<(), ConditionError> {
        let actual = job.state.state_type;
        if let Some(expected) = self.expected_state {
            if expected != actual {
                return Err(ConditionError::InvalidJobState {
                    job_id: job.id.clone(),
                    actual,
                    expected: Some(expected),
                });
            }
        }
        if self.expected_revision != 0 && self.expected_revision != job.revision {
            return Err(ConditionError::InvalidJobRevision {
                job_id: job.id.clone(),
                actual: job.revision,
                expected: self.expected_revision,
            });
        }
        if self.unexpected_states.contains(&actual) {
            return Err(ConditionError::InvalidJobState {
                job_id: job.id.clone(),
                actual,
                expected: None,
            });
        }
        Ok(())
    }
}

/// Guard for an execution update, same conventions as [`UpdateJobCondition`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExecutionCondition {
    pub expected_states: Vec<ExecutionStateType>,
    pub unexpected_states: Vec<ExecutionStateType>,
    pub expected_revision: u64,
}

impl UpdateExecutionCondition {
    pub fn validate(&self, execution: &Execution) -> std::result::Result<(), ConditionError> {
        let actual = execution.compute_state.state_type;
        if !self.expected_states.is_empty() && !self.expected_states.contains(&actual) {
            return Err(ConditionError::InvalidExecutionState {
                execution_id: execution.id.clone(),
                actual,
                expected: self.expected_states.clone(),
            });
        }
        if self.expected_revision != 0 && self.expected_revision != execution.revision {
            return Err(ConditionError::InvalidExecutionRevision {
                execution_id: execution.id.clone(),
                actual: execution.revision,
                expected: self.expected_revision,
            });
        }
        if self.unexpected_states.contains(&actual) {
            return Err(ConditionError::InvalidExecutionState {
                execution_id: execution.id.clone(),
                actual,
                expected: Vec::new(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateJobStateRequest {
    pub job_id: String,
    pub condition: UpdateJobCondition,
    pub new_state: JobStateType,
    pub message: String,
}

/// Fields to overwrite on an execution; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionChanges {
    pub node_id: Option<String>,
    pub compute_state: Option<ExecutionState>,
    pub desired_state: Option<ExecutionDesiredState>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExecutionRequest {
    pub execution_id: String,
    pub condition: UpdateExecutionCondition,
    pub changes: ExecutionChanges,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobDeferral {
    pub job_id: String,
    pub wait_until: DateTime<Utc>,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetExecutionsOptions {
    pub job_id: String,
}

impl GetExecutionsOptions {
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

/// A group of writes applied all-or-nothing by [`JobStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub new_executions: Vec<Execution>,
    pub execution_updates: Vec<UpdateExecutionRequest>,
    pub job_update: Option<UpdateJobStateRequest>,
    pub new_evaluations: Vec<Evaluation>,
    pub deferrals: Vec<JobDeferral>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.new_executions.is_empty()
            && self.execution_updates.is_empty()
            && self.job_update.is_none()
            && self.new_evaluations.is_empty()
            && self.deferrals.is_empty()
    }
}

/// Persistence for jobs, executions and evaluations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Subscribe to store events. Both masks may combine several values, e.g.
    /// `WatcherType::JOB | WatcherType::EXECUTION` with
    /// `EventType::CREATE | EventType::DELETE`.
    async fn watch(&self, types: WatcherType, events: EventType) -> WatchStream;

    async fn get_job(&self, id: &str) -> Result<Job>;

    /// Jobs that are not yet in a terminal state.
    async fn get_in_progress_jobs(&self) -> Result<Vec<Job>>;

    async fn create_job(&self, job: Job) -> Result<()>;

    async fn get_executions(&self, options: GetExecutionsOptions) -> Result<Vec<Execution>>;

    async fn create_execution(&self, execution: Execution) -> Result<()>;

    async fn update_job_state(&self, request: UpdateJobStateRequest) -> Result<()>;

    async fn update_execution(&self, request: UpdateExecutionRequest) -> Result<()>;

    /// Record that scheduling for a job was deferred until `wait_until`.
    async fn record_job_deferral(
        &self,
        job_id: &str,
        wait_until: DateTime<Utc>,
        comment: &str,
    ) -> Result<()>;

    async fn create_evaluation(&self, evaluation: Evaluation) -> Result<()>;

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation>;

    async fn delete_evaluation(&self, id: &str) -> Result<()>;

    /// Remove a job together with its executions, evaluations and history.
    async fn delete_job(&self, job_id: &str) -> Result<()>;

    async fn get_job_history(&self, job_id: &str) -> Result<Vec<JobHistory>>;

    /// Apply every write in the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
