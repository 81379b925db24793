use std::sync::Arc;
use std::time::Duration;

use crate::retry::{DeadlineStrategy, FixedStrategy, RetryStrategy, DEFAULT_SCHEDULING_TIMEOUT};
use crate::selection::{
    AvailabilityRanker, CapacityRanker, LabelsRanker, NodeDiscoverer, RandomRanker,
    RankedNodeSelector,
};
use crate::store::memory::DEFAULT_MAX_JOBS;
use crate::worker::{DEFAULT_MAX_EVAL_ATTEMPTS, DEFAULT_QUEUE_CAPACITY};

/// How replacement of failed or lost executions is budgeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry while the job is younger than its scheduling timeout.
    Deadline,
    Always,
    Never,
}

impl std::str::FromStr for RetryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deadline" => Ok(RetryMode::Deadline),
            "always" => Ok(RetryMode::Always),
            "never" => Ok(RetryMode::Never),
            other => Err(format!("unknown retry mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub mode: RetryMode,
    /// Used by `Deadline` for jobs that leave their scheduling timeout unset.
    pub default_scheduling_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mode: RetryMode::Deadline,
            default_scheduling_timeout: DEFAULT_SCHEDULING_TIMEOUT,
        }
    }
}

impl RetryConfig {
    pub fn strategy(&self) -> Arc<dyn RetryStrategy> {
        match self.mode {
            RetryMode::Deadline => Arc::new(DeadlineStrategy::new(self.default_scheduling_timeout)),
            RetryMode::Always => Arc::new(FixedStrategy::new(true)),
            RetryMode::Never => Arc::new(FixedStrategy::new(false)),
        }
    }
}

/// Which rankers the node selector runs, in order.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub labels: bool,
    pub capacity: bool,
    pub availability: bool,
    /// Upper bound of the random noise added per node; zero disables it.
    pub random_spread: i32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            labels: true,
            capacity: true,
            availability: true,
            random_spread: 0,
        }
    }
}

impl RankingConfig {
    pub fn selector(&self, discoverer: Arc<dyn NodeDiscoverer>) -> RankedNodeSelector {
        let mut selector = RankedNodeSelector::new(discoverer);
        if self.labels {
            selector = selector.with_ranker(LabelsRanker::new());
        }
        if self.capacity {
            selector = selector.with_ranker(CapacityRanker::new());
        }
        if self.availability {
            selector = selector.with_ranker(AvailabilityRanker::new());
        }
        if self.random_spread > 0 {
            selector = selector.with_ranker(RandomRanker::new(self.random_spread));
        }
        selector
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Evaluations buffered before producers spill into background delivery.
    pub queue_capacity: usize,
    /// Attempts per evaluation on condition violations or transient errors.
    pub max_eval_attempts: u32,
    /// Jobs the in-memory store accepts before rejecting new ones.
    pub max_jobs: usize,
    pub retry: RetryConfig,
    pub ranking: RankingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_eval_attempts: DEFAULT_MAX_EVAL_ATTEMPTS,
            max_jobs: DEFAULT_MAX_JOBS,
            retry: RetryConfig::default(),
            ranking: RankingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}
