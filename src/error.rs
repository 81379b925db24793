use thiserror::Error;

use crate::models::{ExecutionStateType, JobStateType};

/// A conditioned write was rejected because the target moved since it was read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("job {job_id} is in state {actual}, expected {expected:?}")]
    InvalidJobState {
        job_id: String,
        actual: JobStateType,
        expected: Option<JobStateType>,
    },

    #[error("job {job_id} has revision {actual}, expected {expected}")]
    InvalidJobRevision {
        job_id: String,
        actual: u64,
        expected: u64,
    },

    #[error("execution {execution_id} is in state {actual}, expected one of {expected:?}")]
    InvalidExecutionState {
        execution_id: String,
        actual: ExecutionStateType,
        expected: Vec<ExecutionStateType>,
    },

    #[error("execution {execution_id} has revision {actual}, expected {expected}")]
    InvalidExecutionRevision {
        execution_id: String,
        actual: u64,
        expected: u64,
    },
}

#[derive(Error, Debug)]
pub enum OrchError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    JobAlreadyExists(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution already exists: {0}")]
    ExecutionAlreadyExists(String),

    #[error("Evaluation not found: {0}")]
    EvaluationNotFound(String),

    #[error("Condition violated: {0}")]
    Condition(#[from] ConditionError),

    #[error("not enough nodes to run job: requested {requested}, matched {matched}")]
    NotEnoughNodes {
        requested: usize,
        matched: usize,
        /// Why each rejected node was ruled out, as `node_id: reason`.
        reasons: Vec<String>,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Node discovery error: {0}")]
    Discovery(String),

    #[error("No scheduler registered for job type {0}")]
    UnsupportedJobType(String),

    #[error("Evaluation queue closed")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchError {
    /// Another writer changed the job or execution; reload and re-evaluate.
    pub fn is_condition_violation(&self) -> bool {
        matches!(self, OrchError::Condition(_))
    }

    /// I/O style failures the dispatcher may retry with the same evaluation.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchError::Store(_) | OrchError::Discovery(_))
    }

    pub fn is_not_enough_nodes(&self) -> bool {
        matches!(self, OrchError::NotEnoughNodes { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchError>;
