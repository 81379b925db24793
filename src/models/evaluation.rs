use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Job, JobType};

/// Why an evaluation was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalTrigger {
    JobRegister,
    JobUpdate,
    ExecutionUpdate,
    NodeUpdate,
    /// Created by a scheduler backing off after bid rejections.
    Defer,
    Manual,
}

impl std::fmt::Display for EvalTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalTrigger::JobRegister => write!(f, "job-register"),
            EvalTrigger::JobUpdate => write!(f, "job-update"),
            EvalTrigger::ExecutionUpdate => write!(f, "execution-update"),
            EvalTrigger::NodeUpdate => write!(f, "node-update"),
            EvalTrigger::Defer => write!(f, "defer"),
            EvalTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// A unit of scheduling work: something about this job may need reconciling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub job_id: String,
    pub job_type: JobType,
    pub triggered_by: EvalTrigger,
    /// Do not process before this instant.
    pub wait_until: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(job: &Job, triggered_by: EvalTrigger) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            job_type: job.job_type,
            triggered_by,
            wait_until: None,
            create_time: Utc::now(),
        }
    }

    /// Follow-up evaluation for the same job, due after `delay`.
    pub fn deferred(&self, delay: Duration) -> Self {
        let now = Utc::now();
        let wait_until = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: self.job_id.clone(),
            job_type: self.job_type,
            triggered_by: EvalTrigger::Defer,
            wait_until: Some(wait_until),
            create_time: now,
        }
    }

    pub fn is_deferred_retry(&self) -> bool {
        self.triggered_by == EvalTrigger::Defer
    }
}
