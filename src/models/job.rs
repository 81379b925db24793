use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// Runs until `count` executions complete.
    Batch,
    /// Runs `count` executions until the user stops the job.
    Service,
    /// Runs once on every matching node.
    Ops,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Batch => write!(f, "batch"),
            JobType::Service => write!(f, "service"),
            JobType::Ops => write!(f, "ops"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStateType {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStateType {
    pub const TERMINAL: [JobStateType; 3] = [
        JobStateType::Completed,
        JobStateType::Failed,
        JobStateType::Stopped,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl std::fmt::Display for JobStateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStateType::Pending => write!(f, "pending"),
            JobStateType::Running => write!(f, "running"),
            JobStateType::Completed => write!(f, "completed"),
            JobStateType::Failed => write!(f, "failed"),
            JobStateType::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub state_type: JobStateType,
    pub message: String,
}

impl JobState {
    pub fn new(state_type: JobStateType) -> Self {
        Self {
            state_type,
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// How the orchestrator retries placement for a job. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReschedulingPolicy {
    /// How long after creation placement may still be attempted. Zero defers
    /// to the retry strategy's default.
    pub scheduling_timeout_secs: u64,
    pub base_retry_delay_secs: u64,
    pub maximum_retry_delay_secs: u64,
    pub retry_delay_growth_factor: f64,
}

impl Default for ReschedulingPolicy {
    fn default() -> Self {
        Self {
            scheduling_timeout_secs: 0,
            base_retry_delay_secs: 60,
            maximum_retry_delay_secs: 600,
            retry_delay_growth_factor: 2.0,
        }
    }
}

impl ReschedulingPolicy {
    pub fn scheduling_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduling_timeout_secs)
    }

    /// Backoff after `rejections` bid rejections:
    /// `min(base * growth^(rejections - 1), maximum)`. The first rejection
    /// yields the base delay; zero rejections yield no delay.
    pub fn retry_delay(&self, rejections: usize) -> Duration {
        if rejections == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(rejections - 1).unwrap_or(i32::MAX);
        let scaled =
            self.base_retry_delay_secs as f64 * self.retry_delay_growth_factor.powi(exponent);
        let capped = scaled.min(self.maximum_retry_delay_secs as f64).max(0.0);
        Duration::try_from_secs_f64(capped).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub job_type: JobType,
    /// Desired number of concurrent executions.
    pub count: usize,
    /// Node labels a node must carry to be eligible, `key -> value`.
    pub constraints: BTreeMap<String, String>,
    pub rescheduling_policy: ReschedulingPolicy,
    pub state: JobState,
    pub revision: u64,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

impl Job {
    pub fn new(name: impl Into<String>, job_type: JobType, count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: format!("j-{}", Uuid::new_v4()),
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            job_type,
            count,
            constraints: BTreeMap::new(),
            rescheduling_policy: ReschedulingPolicy::default(),
            state: JobState::new(JobStateType::Pending),
            revision: 0,
            create_time: now,
            modify_time: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn with_rescheduling_policy(mut self, policy: ReschedulingPolicy) -> Self {
        self.rescheduling_policy = policy;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.state_type.is_terminal()
    }
}
