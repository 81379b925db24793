use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{ConditionError, OrchError, Result};
use crate::models::{Evaluation, Execution, Job, JobHistory};
use crate::store::watch::WatcherRegistry;
use crate::store::{
    EventType, GetExecutionsOptions, JobDeferral, JobStore, UpdateExecutionRequest,
    UpdateJobStateRequest, WatchStream, WatcherType, WriteBatch,
};

pub const DEFAULT_MAX_JOBS: usize = 10_000;
const DEFAULT_WATCH_BUFFER: usize = 1024;

struct StoreState {
    jobs: HashMap<String, Job>,
    executions: HashMap<String, Execution>,
    evaluations: HashMap<String, Evaluation>,
    history: HashMap<String, Vec<JobHistory>>,
    watchers: WatcherRegistry,
}

/// Job store kept entirely in memory.
///
/// All reads and writes go through a single lock, so a [`WriteBatch`] is
/// validated in full before any of it is applied.
pub struct InMemoryJobStore {
    state: RwLock<StoreState>,
    max_jobs: usize,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                jobs: HashMap::new(),
                executions: HashMap::new(),
                evaluations: HashMap::new(),
                history: HashMap::new(),
                watchers: WatcherRegistry::new(DEFAULT_WATCH_BUFFER),
            }),
            max_jobs,
        }
    }

    /// Number of jobs currently stored.
    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.jobs.is_empty()
    }
}

impl StoreState {
    fn job(&self, id: &str) -> Result<&Job> {
        self.jobs
            .get(id)
            .ok_or_else(|| OrchError::JobNotFound(id.to_string()))
    }

    fn record(&mut self, entry: JobHistory) {
        self.history
            .entry(entry.job_id.clone())
            .or_default()
            .push(entry);
    }

    fn check_new_execution(&self, execution: &Execution) -> Result<()> {
        self.job(&execution.job_id)?;
        if self.executions.contains_key(&execution.id) {
            return Err(OrchError::ExecutionAlreadyExists(execution.id.clone()));
        }
        Ok(())
    }

    fn apply_new_execution(&mut self, mut execution: Execution) {
        let now = Utc::now();
        execution.revision = 1;
        execution.create_time = now;
        execution.modify_time = now;
        self.record(JobHistory::execution(
            &execution.job_id,
            &execution.id,
            None,
            execution.compute_state.state_type.to_string(),
            format!("Execution created on node {}", execution.node_id),
        ));
        self.watchers
            .publish(WatcherType::EXECUTION, EventType::CREATE, &execution);
        self.executions.insert(execution.id.clone(), execution);
    }

    fn check_execution_update(&self, request: &UpdateExecutionRequest) -> Result<()> {
        let execution = self
            .executions
            .get(&request.execution_id)
            .ok_or_else(|| OrchError::ExecutionNotFound(request.execution_id.clone()))?;
        request.condition.validate(execution)?;
        Ok(())
    }

    fn apply_execution_update(&mut self, request: UpdateExecutionRequest) {
        let Some(execution) = self.executions.get_mut(&request.execution_id) else {
            return;
        };
        let previous = execution.compute_state.state_type;
        let changes = request.changes;
        if let Some(node_id) = changes.node_id {
            execution.node_id = node_id;
        }
        if let Some(compute_state) = changes.compute_state {
            execution.compute_state = compute_state;
        }
        if let Some(desired_state) = changes.desired_state {
            execution.desired_state = desired_state;
        }
        execution.revision += 1;
        execution.modify_time = Utc::now();

        let execution = execution.clone();
        self.record(JobHistory::execution(
            &execution.job_id,
            &execution.id,
            Some(previous.to_string()),
            execution.compute_state.state_type.to_string(),
            request.comment,
        ));
        self.watchers
            .publish(WatcherType::EXECUTION, EventType::UPDATE, &execution);
    }

    fn check_job_update(&self, request: &UpdateJobStateRequest) -> Result<()> {
        let job = self.job(&request.job_id)?;
        request.condition.validate(job)?;
        let current = job.state.state_type;
        if current.is_terminal() && current != request.new_state {
            return Err(ConditionError::InvalidJobState {
                job_id: job.id.clone(),
                actual: current,
                expected: None,
            }
            .into());
        }
        Ok(())
    }

    fn apply_job_update(&mut self, request: UpdateJobStateRequest) {
        let Some(job) = self.jobs.get_mut(&request.job_id) else {
            return;
        };
        let previous = job.state.state_type;
        job.state.state_type = request.new_state;
        job.state.message = request.message.clone();
        job.revision += 1;
        job.modify_time = Utc::now();

        let job = job.clone();
        self.record(JobHistory::job(
            &job.id,
            Some(previous.to_string()),
            job.state.state_type.to_string(),
            request.message,
        ));
        self.watchers
            .publish(WatcherType::JOB, EventType::UPDATE, &job);
    }

    fn check_new_evaluation(&self, evaluation: &Evaluation) -> Result<()> {
        self.job(&evaluation.job_id)?;
        if self.evaluations.contains_key(&evaluation.id) {
            return Err(OrchError::Internal(format!(
                "evaluation {} already exists",
                evaluation.id
            )));
        }
        Ok(())
    }

    fn apply_new_evaluation(&mut self, evaluation: Evaluation) {
        self.watchers
            .publish(WatcherType::EVALUATION, EventType::CREATE, &evaluation);
        self.evaluations.insert(evaluation.id.clone(), evaluation);
    }

    fn apply_deferral(&mut self, deferral: JobDeferral) {
        let state = self
            .jobs
            .get(&deferral.job_id)
            .map(|job| job.state.state_type.to_string())
            .unwrap_or_default();
        self.record(JobHistory::job(
            &deferral.job_id,
            Some(state.clone()),
            state,
            format!(
                "{} (scheduling deferred until {})",
                deferral.comment,
                deferral.wait_until.to_rfc3339()
            ),
        ));
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn watch(&self, types: WatcherType, events: EventType) -> WatchStream {
        self.state.write().await.watchers.register(types, events)
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        self.state.read().await.job(id).cloned()
    }

    async fn get_in_progress_jobs(&self) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn create_job(&self, mut job: Job) -> Result<()> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(OrchError::JobAlreadyExists(job.id));
        }
        if state.jobs.len() >= self.max_jobs {
            return Err(OrchError::Store(format!(
                "job store at capacity ({} jobs)",
                self.max_jobs
            )));
        }
        job.revision = 1;
        job.modify_time = Utc::now();

        state.record(JobHistory::job(
            &job.id,
            None,
            job.state.state_type.to_string(),
            "Job created",
        ));
        state.watchers.publish(WatcherType::JOB, EventType::CREATE, &job);
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "Job created");
        state.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_executions(&self, options: GetExecutionsOptions) -> Result<Vec<Execution>> {
        let state = self.state.read().await;
        state.job(&options.job_id)?;
        let mut executions: Vec<Execution> = state
            .executions
            .values()
            .filter(|e| e.job_id == options.job_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        Ok(executions)
    }

    async fn create_execution(&self, execution: Execution) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_new_execution(&execution)?;
        state.apply_new_execution(execution);
        Ok(())
    }

    async fn update_job_state(&self, request: UpdateJobStateRequest) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_job_update(&request)?;
        state.apply_job_update(request);
        Ok(())
    }

    async fn update_execution(&self, request: UpdateExecutionRequest) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_execution_update(&request)?;
        state.apply_execution_update(request);
        Ok(())
    }

    async fn record_job_deferral(
        &self,
        job_id: &str,
        wait_until: DateTime<Utc>,
        comment: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.job(job_id)?;
        state.apply_deferral(JobDeferral {
            job_id: job_id.to_string(),
            wait_until,
            comment: comment.to_string(),
        });
        Ok(())
    }

    async fn create_evaluation(&self, evaluation: Evaluation) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_new_evaluation(&evaluation)?;
        state.apply_new_evaluation(evaluation);
        Ok(())
    }

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation> {
        self.state
            .read()
            .await
            .evaluations
            .get(id)
            .cloned()
            .ok_or_else(|| OrchError::EvaluationNotFound(id.to_string()))
    }

    async fn delete_evaluation(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let evaluation = state
            .evaluations
            .remove(id)
            .ok_or_else(|| OrchError::EvaluationNotFound(id.to_string()))?;
        state
            .watchers
            .publish(WatcherType::EVALUATION, EventType::DELETE, &evaluation);
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .remove(job_id)
            .ok_or_else(|| OrchError::JobNotFound(job_id.to_string()))?;

        let execution_ids: Vec<String> = state
            .executions
            .values()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.id.clone())
            .collect();
        for id in execution_ids {
            if let Some(execution) = state.executions.remove(&id) {
                state
                    .watchers
                    .publish(WatcherType::EXECUTION, EventType::DELETE, &execution);
            }
        }
        let evaluation_ids: Vec<String> = state
            .evaluations
            .values()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.id.clone())
            .collect();
        for id in evaluation_ids {
            if let Some(evaluation) = state.evaluations.remove(&id) {
                state
                    .watchers
                    .publish(WatcherType::EVALUATION, EventType::DELETE, &evaluation);
            }
        }
        state.history.remove(job_id);
        state.watchers.publish(WatcherType::JOB, EventType::DELETE, &job);
        tracing::debug!(job_id, "Job deleted");
        Ok(())
    }

    async fn get_job_history(&self, job_id: &str) -> Result<Vec<JobHistory>> {
        let state = self.state.read().await;
        state.job(job_id)?;
        Ok(state.history.get(job_id).cloned().unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;

        let mut new_ids = HashSet::new();
        for execution in &batch.new_executions {
            state.check_new_execution(execution)?;
            if !new_ids.insert(execution.id.as_str()) {
                return Err(OrchError::ExecutionAlreadyExists(execution.id.clone()));
            }
        }
        let mut updated_ids = HashSet::new();
        for request in &batch.execution_updates {
            state.check_execution_update(request)?;
            if !updated_ids.insert(request.execution_id.as_str()) {
                return Err(OrchError::Internal(format!(
                    "execution {} updated twice in one batch",
                    request.execution_id
                )));
            }
        }
        if let Some(request) = &batch.job_update {
            state.check_job_update(request)?;
        }
        for evaluation in &batch.new_evaluations {
            state.check_new_evaluation(evaluation)?;
        }
        for deferral in &batch.deferrals {
            state.job(&deferral.job_id)?;
        }

        for execution in batch.new_executions {
            state.apply_new_execution(execution);
        }
        for request in batch.execution_updates {
            state.apply_execution_update(request);
        }
        if let Some(request) = batch.job_update {
            state.apply_job_update(request);
        }
        for evaluation in batch.new_evaluations {
            state.apply_new_evaluation(evaluation);
        }
        for deferral in batch.deferrals {
            state.apply_deferral(deferral);
        }
        Ok(())
    }
}
