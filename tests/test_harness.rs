//! Shared fakes and fixtures for scheduler and orchestrator tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use orch_lite::config::OrchestratorConfig;
use orch_lite::error::{OrchError, Result};
use orch_lite::models::{
    EvalTrigger, Evaluation, Execution, ExecutionState, ExecutionStateType, Job, JobHistory,
    JobStateType, JobType, NodeInfo, Plan,
};
use orch_lite::orchestrator::Orchestrator;
use orch_lite::planner::Planner;
use orch_lite::retry::FixedStrategy;
use orch_lite::scheduler::{BatchServiceJobScheduler, Scheduler};
use orch_lite::selection::NodeSelector;
use orch_lite::store::{
    EventType, ExecutionChanges, GetExecutionsOptions, JobStore, UpdateExecutionCondition,
    UpdateExecutionRequest, UpdateJobStateRequest, WatchStream, WatcherType, WriteBatch,
};

/// Planner that keeps every plan it is given.
#[derive(Default)]
pub struct RecordingPlanner {
    plans: Mutex<Vec<Plan>>,
}

impl RecordingPlanner {
    pub async fn plans(&self) -> Vec<Plan> {
        self.plans.lock().await.clone()
    }

    pub async fn last(&self) -> Plan {
        self.plans
            .lock()
            .await
            .last()
            .cloned()
            .expect("no plan was submitted")
    }
}

#[async_trait]
impl Planner for RecordingPlanner {
    async fn process(&self, plan: &Plan) -> Result<()> {
        self.plans.lock().await.push(plan.clone());
        Ok(())
    }
}

/// Node selector over a fixed node list that remembers the minimum delays it
/// was asked for.
pub struct StaticNodeSelector {
    nodes: Vec<NodeInfo>,
    min_delays: Mutex<Vec<Duration>>,
}

impl StaticNodeSelector {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self {
            nodes,
            min_delays: Mutex::new(Vec::new()),
        }
    }

    pub async fn min_delays(&self) -> Vec<Duration> {
        self.min_delays.lock().await.clone()
    }
}

#[async_trait]
impl NodeSelector for StaticNodeSelector {
    async fn all_nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.nodes.clone())
    }

    async fn top_matching_nodes(
        &self,
        _job: &Job,
        count: usize,
        min_delay: Duration,
    ) -> Result<Vec<NodeInfo>> {
        self.min_delays.lock().await.push(min_delay);
        if self.nodes.len() < count {
            return Err(OrchError::NotEnoughNodes {
                requested: count,
                matched: self.nodes.len(),
                reasons: Vec::new(),
            });
        }
        Ok(self.nodes[..count].to_vec())
    }

    async fn all_matching_nodes(&self, _job: &Job, _min_delay: Duration) -> Result<Vec<NodeInfo>> {
        Ok(self.nodes.clone())
    }
}

/// Read-only store serving a fixed job and execution snapshot verbatim,
/// timestamps included.
pub struct SnapshotStore {
    job: Job,
    executions: Vec<Execution>,
}

impl SnapshotStore {
    pub fn new(job: Job, executions: Vec<Execution>) -> Self {
        Self { job, executions }
    }

    fn read_only<T>() -> Result<T> {
        Err(OrchError::Store("snapshot store is read-only".to_string()))
    }
}

#[async_trait]
impl JobStore for SnapshotStore {
    async fn watch(&self, _types: WatcherType, _events: EventType) -> WatchStream {
        let (_tx, rx) = mpsc::channel(1);
        ReceiverStream::new(rx)
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        if id == self.job.id {
            Ok(self.job.clone())
        } else {
            Err(OrchError::JobNotFound(id.to_string()))
        }
    }

    async fn get_in_progress_jobs(&self) -> Result<Vec<Job>> {
        Ok(vec![self.job.clone()])
    }

    async fn create_job(&self, _job: Job) -> Result<()> {
        Self::read_only()
    }

    async fn get_executions(&self, options: GetExecutionsOptions) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| e.job_id == options.job_id)
            .cloned()
            .collect())
    }

    async fn create_execution(&self, _execution: Execution) -> Result<()> {
        Self::read_only()
    }

    async fn update_job_state(&self, _request: UpdateJobStateRequest) -> Result<()> {
        Self::read_only()
    }

    async fn update_execution(&self, _request: UpdateExecutionRequest) -> Result<()> {
        Self::read_only()
    }

    async fn record_job_deferral(
        &self,
        _job_id: &str,
        _wait_until: DateTime<Utc>,
        _comment: &str,
    ) -> Result<()> {
        Self::read_only()
    }

    async fn create_evaluation(&self, _evaluation: Evaluation) -> Result<()> {
        Self::read_only()
    }

    async fn get_evaluation(&self, id: &str) -> Result<Evaluation> {
        Err(OrchError::EvaluationNotFound(id.to_string()))
    }

    async fn delete_evaluation(&self, _id: &str) -> Result<()> {
        Self::read_only()
    }

    async fn delete_job(&self, _job_id: &str) -> Result<()> {
        Self::read_only()
    }

    async fn get_job_history(&self, _job_id: &str) -> Result<Vec<JobHistory>> {
        Ok(Vec::new())
    }

    async fn commit(&self, _batch: WriteBatch) -> Result<()> {
        Self::read_only()
    }
}

/// `count` healthy nodes named `node-0`, `node-1`, ...
pub fn nodes(count: usize) -> Vec<NodeInfo> {
    (0..count).map(|i| NodeInfo::new(format!("node-{i}"))).collect()
}

/// An execution of `job` on `node` in `state`, last modified `age_secs` ago.
pub fn execution(job: &Job, node: &str, state: ExecutionStateType, age_secs: i64) -> Execution {
    let mut exec = Execution::new(job, "eval-setup")
        .with_node(node)
        .with_compute_state(state);
    let at = Utc::now() - chrono::Duration::seconds(age_secs);
    exec.create_time = at;
    exec.modify_time = at;
    exec.revision = 1;
    exec
}

/// Everything needed to run the batch/service scheduler against a snapshot.
pub struct SchedulerFixture {
    pub job: Job,
    pub planner: Arc<RecordingPlanner>,
    pub selector: Arc<StaticNodeSelector>,
    pub scheduler: BatchServiceJobScheduler,
}

impl SchedulerFixture {
    pub fn new(job: Job, executions: Vec<Execution>, nodes: Vec<NodeInfo>) -> Self {
        Self::with_retry(job, executions, nodes, true)
    }

    pub fn with_retry(
        job: Job,
        executions: Vec<Execution>,
        nodes: Vec<NodeInfo>,
        should_retry: bool,
    ) -> Self {
        let planner = Arc::new(RecordingPlanner::default());
        let selector = Arc::new(StaticNodeSelector::new(nodes));
        let scheduler = BatchServiceJobScheduler::new(
            Arc::new(SnapshotStore::new(job.clone(), executions)),
            planner.clone(),
            selector.clone(),
            Arc::new(FixedStrategy::new(should_retry)),
        );
        Self {
            job,
            planner,
            selector,
            scheduler,
        }
    }

    /// Process one evaluation with the given trigger and return its plan.
    pub async fn process(&self, trigger: EvalTrigger) -> Plan {
        let evaluation = Evaluation::new(&self.job, trigger);
        self.scheduler
            .process(&evaluation)
            .await
            .expect("scheduler failed");
        self.planner.last().await
    }
}

pub fn batch_job(count: usize) -> Job {
    Job::new("batch", JobType::Batch, count)
}

pub fn service_job(count: usize) -> Job {
    Job::new("service", JobType::Service, count)
}

/// A running orchestrator with a worker and `nodes(n)` registered, where the
/// test plays the compute nodes by reporting execution states.
pub struct OrchestratorFixture {
    pub orchestrator: Orchestrator,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl OrchestratorFixture {
    pub async fn start(node_count: usize) -> Self {
        Self::with_config(node_count, OrchestratorConfig::default()).await
    }

    pub async fn with_config(node_count: usize, config: OrchestratorConfig) -> Self {
        let (orchestrator, eval_rx) = Orchestrator::new(config);
        for node in nodes(node_count) {
            orchestrator.register_node(node).await;
        }
        let shutdown = CancellationToken::new();
        let worker = orchestrator.spawn_worker(eval_rx, shutdown.clone());
        Self {
            orchestrator,
            shutdown,
            worker: Some(worker),
        }
    }

    pub async fn executions(&self, job_id: &str) -> Vec<Execution> {
        self.orchestrator
            .store
            .get_executions(GetExecutionsOptions::for_job(job_id))
            .await
            .unwrap_or_default()
    }

    pub async fn job_state(&self, job_id: &str) -> Option<JobStateType> {
        self.orchestrator
            .store
            .get_job(job_id)
            .await
            .ok()
            .map(|job| job.state.state_type)
    }

    /// Report a compute state for an execution the way a node would, then
    /// ask for the job to be re-evaluated. Retries when the scheduler moved
    /// the execution in between.
    pub async fn report(&self, execution_id: &str, state: ExecutionState) {
        for _ in 0..20 {
            let current = self
                .find_execution(execution_id)
                .await
                .expect("execution disappeared");
            let result = self
                .orchestrator
                .store
                .update_execution(UpdateExecutionRequest {
                    execution_id: execution_id.to_string(),
                    condition: UpdateExecutionCondition {
                        expected_revision: current.revision,
                        ..Default::default()
                    },
                    changes: ExecutionChanges {
                        compute_state: Some(state.clone()),
                        ..Default::default()
                    },
                    comment: format!("node {} reported {}", current.node_id, state.state_type),
                })
                .await;
            match result {
                Ok(()) => {
                    self.orchestrator
                        .evaluate(&current.job_id, EvalTrigger::ExecutionUpdate)
                        .await
                        .expect("evaluation not queued");
                    return;
                }
                Err(e) if e.is_condition_violation() => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => panic!("report failed: {e}"),
            }
        }
        panic!("execution {execution_id} kept changing under the report");
    }

    async fn find_execution(&self, execution_id: &str) -> Option<Execution> {
        for job in self.orchestrator.store.get_in_progress_jobs().await.ok()? {
            if let Some(exec) = self
                .executions(&job.id)
                .await
                .into_iter()
                .find(|e| e.id == execution_id)
            {
                return Some(exec);
            }
        }
        None
    }

    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;
        }
    }
}

/// Poll a condition until it holds or the timeout elapses
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
