//! Retry budget policies consulted before replacing failed or lost executions.

use std::time::Duration;

use chrono::Utc;

use crate::models::Job;

/// Default placement window for jobs whose policy leaves the timeout unset.
pub const DEFAULT_SCHEDULING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub job: Job,
}

impl RetryRequest {
    pub fn new(job: &Job) -> Self {
        Self { job: job.clone() }
    }
}

pub trait RetryStrategy: Send + Sync {
    /// Whether the job may still get replacement executions.
    fn should_retry(&self, request: &RetryRequest) -> bool;
}

/// Always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedStrategy {
    should_retry: bool,
}

impl FixedStrategy {
    pub fn new(should_retry: bool) -> Self {
        Self { should_retry }
    }
}

impl RetryStrategy for FixedStrategy {
    fn should_retry(&self, _request: &RetryRequest) -> bool {
        self.should_retry
    }
}

/// Retries while the job is younger than its scheduling timeout.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineStrategy {
    default_timeout: Duration,
}

impl Default for DeadlineStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULING_TIMEOUT)
    }
}

impl DeadlineStrategy {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl RetryStrategy for DeadlineStrategy {
    fn should_retry(&self, request: &RetryRequest) -> bool {
        let job = &request.job;
        let timeout = match job.rescheduling_policy.scheduling_timeout() {
            t if t.is_zero() => self.default_timeout,
            t => t,
        };
        // A create_time in the future counts as zero age.
        let age = (Utc::now() - job.create_time).to_std().unwrap_or(Duration::ZERO);
        let retry = age < timeout;
        if !retry {
            tracing::debug!(
                job_id = %job.id,
                age_secs = age.as_secs(),
                timeout_secs = timeout.as_secs(),
                "Job exceeded its scheduling timeout"
            );
        }
        retry
    }
}
