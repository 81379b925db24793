use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryLevel {
    Job,
    Execution,
}

/// One recorded state change of a job or one of its executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistory {
    pub time: DateTime<Utc>,
    pub level: HistoryLevel,
    pub job_id: String,
    pub execution_id: Option<String>,
    pub previous_state: Option<String>,
    pub new_state: String,
    pub comment: String,
}

impl JobHistory {
    pub fn job(
        job_id: &str,
        previous_state: Option<String>,
        new_state: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            time: Utc::now(),
            level: HistoryLevel::Job,
            job_id: job_id.to_string(),
            execution_id: None,
            previous_state,
            new_state: new_state.into(),
            comment: comment.into(),
        }
    }

    pub fn execution(
        job_id: &str,
        execution_id: &str,
        previous_state: Option<String>,
        new_state: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            time: Utc::now(),
            level: HistoryLevel::Execution,
            job_id: job_id.to_string(),
            execution_id: Some(execution_id.to_string()),
            previous_state,
            new_state: new_state.into(),
            comment: comment.into(),
        }
    }
}
