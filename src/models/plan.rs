use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{Evaluation, Execution, Job, JobStateType};

/// Why the scheduler asked for an execution to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    /// The job already has enough executions, or is finished.
    NotNeeded,
    /// The hosting node is no longer known-healthy.
    Lost,
    /// Accepted by its node after the job's capacity was already filled.
    Rejected,
    /// The job failed, so its remaining executions are stopped.
    JobFailed,
}

impl StopReason {
    pub fn message(&self) -> &'static str {
        match self {
            StopReason::NotNeeded => "execution is no longer needed",
            StopReason::Lost => "execution lost: node is no longer available",
            StopReason::Rejected => "execution rejected: job already has enough executions",
            StopReason::JobFailed => "execution stopped because the job failed",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::NotNeeded => write!(f, "not-needed"),
            StopReason::Lost => write!(f, "lost"),
            StopReason::Rejected => write!(f, "rejected"),
            StopReason::JobFailed => write!(f, "job-failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionAction {
    Approved,
    Stopped(StopReason),
}

/// A staged change to an existing execution, carrying the snapshot it was
/// computed from so the planner can condition the write on its revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub execution: Execution,
    pub action: ExecutionAction,
}

/// The write-set produced by reconciling one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub eval_id: String,
    pub job_id: String,
    pub evaluation: Evaluation,
    /// Job snapshot the plan was computed against.
    pub job: Job,
    pub desired_job_state: Option<JobStateType>,
    pub job_state_message: String,
    pub new_executions: Vec<Execution>,
    pub updated_executions: BTreeMap<String, ExecutionUpdate>,
    pub new_evaluations: Vec<Evaluation>,
}

impl Plan {
    pub fn new(evaluation: &Evaluation, job: &Job) -> Self {
        Self {
            eval_id: evaluation.id.clone(),
            job_id: job.id.clone(),
            evaluation: evaluation.clone(),
            job: job.clone(),
            desired_job_state: None,
            job_state_message: String::new(),
            new_executions: Vec::new(),
            updated_executions: BTreeMap::new(),
            new_evaluations: Vec::new(),
        }
    }

    pub fn append_execution(&mut self, execution: Execution) {
        self.new_executions.push(execution);
    }

    pub fn append_approved_execution(&mut self, execution: &Execution) {
        self.updated_executions.insert(
            execution.id.clone(),
            ExecutionUpdate {
                execution: execution.clone(),
                action: ExecutionAction::Approved,
            },
        );
    }

    pub fn append_stopped_execution(&mut self, execution: &Execution, reason: StopReason) {
        self.updated_executions.insert(
            execution.id.clone(),
            ExecutionUpdate {
                execution: execution.clone(),
                action: ExecutionAction::Stopped(reason),
            },
        );
    }

    pub fn mark_job_completed(&mut self) {
        self.desired_job_state = Some(JobStateType::Completed);
        self.job_state_message.clear();
    }

    pub fn mark_job_failed(&mut self, message: impl Into<String>) {
        self.desired_job_state = Some(JobStateType::Failed);
        self.job_state_message = message.into();
    }

    /// Move a pending job to running once it has something running or an
    /// execution was approved by this plan.
    pub fn mark_job_running_if_eligible(&mut self, has_running: bool) {
        if self.job.state.state_type != JobStateType::Pending || self.desired_job_state.is_some() {
            return;
        }
        let approved_any = self
            .updated_executions
            .values()
            .any(|u| u.action == ExecutionAction::Approved);
        if has_running || approved_any {
            self.desired_job_state = Some(JobStateType::Running);
        }
    }

    /// Ask for the job to be evaluated again after `delay`.
    pub fn defer_evaluation(&mut self, delay: Duration) {
        self.new_evaluations.push(self.evaluation.deferred(delay));
    }

    pub fn approved_ids(&self) -> Vec<&str> {
        self.updated_executions
            .iter()
            .filter(|(_, u)| u.action == ExecutionAction::Approved)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn stopped_ids(&self) -> Vec<&str> {
        self.updated_executions
            .iter()
            .filter(|(_, u)| matches!(u.action, ExecutionAction::Stopped(_)))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn stop_reason(&self, execution_id: &str) -> Option<StopReason> {
        match self.updated_executions.get(execution_id)?.action {
            ExecutionAction::Stopped(reason) => Some(reason),
            ExecutionAction::Approved => None,
        }
    }

    /// True when applying the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.desired_job_state.is_none()
            && self.new_executions.is_empty()
            && self.updated_executions.is_empty()
            && self.new_evaluations.is_empty()
    }
}
