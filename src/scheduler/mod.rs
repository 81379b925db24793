pub mod batch_service;
pub mod exec_set;
pub mod ops;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{OrchError, Result};
use crate::models::{Evaluation, JobType};

pub use batch_service::BatchServiceJobScheduler;
pub use exec_set::{ExecSet, ExecSetsByApprovalStatus};
pub use ops::OpsJobScheduler;

/// Reconciles one job in response to an evaluation.
///
/// Implementations read current state, compute a plan and hand it to a
/// planner. They hold no state between calls and may be re-invoked with the
/// same evaluation any number of times.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn process(&self, evaluation: &Evaluation) -> Result<()>;
}

/// Routes evaluations to the scheduler registered for their job type.
#[derive(Default)]
pub struct SchedulerProvider {
    schedulers: HashMap<JobType, Arc<dyn Scheduler>>,
}

impl SchedulerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scheduler(mut self, job_type: JobType, scheduler: Arc<dyn Scheduler>) -> Self {
        self.schedulers.insert(job_type, scheduler);
        self
    }

    pub fn scheduler(&self, job_type: JobType) -> Option<Arc<dyn Scheduler>> {
        self.schedulers.get(&job_type).cloned()
    }

    pub fn enabled(&self, job_type: JobType) -> bool {
        self.schedulers.contains_key(&job_type)
    }
}

#[async_trait]
impl Scheduler for SchedulerProvider {
    async fn process(&self, evaluation: &Evaluation) -> Result<()> {
        let scheduler = self
            .scheduler(evaluation.job_type)
            .ok_or_else(|| OrchError::UnsupportedJobType(evaluation.job_type.to_string()))?;
        scheduler.process(evaluation).await
    }
}
