use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::models::{EvalTrigger, Evaluation, Job, JobStateType, JobType, NodeInfo, NodeState};
use crate::planner::StorePlanner;
use crate::scheduler::{BatchServiceJobScheduler, OpsJobScheduler, SchedulerProvider};
use crate::selection::NodeInventory;
use crate::store::{
    GetExecutionsOptions, InMemoryJobStore, JobStore, UpdateJobCondition, UpdateJobStateRequest,
};
use crate::worker::{EvaluationBroker, EvaluationWorker};

/// Wires the store, node inventory, schedulers, planner and evaluation worker
/// together and exposes the entry points that create evaluations.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub store: Arc<InMemoryJobStore>,
    pub inventory: Arc<NodeInventory>,
    provider: Arc<SchedulerProvider>,
    broker: EvaluationBroker,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> (Self, mpsc::Receiver<Evaluation>) {
        let (broker, eval_rx) = EvaluationBroker::new(config.queue_capacity);
        let store = Arc::new(InMemoryJobStore::with_capacity(config.max_jobs));
        let inventory = Arc::new(NodeInventory::new());

        let job_store: Arc<dyn JobStore> = store.clone();
        let selector = Arc::new(config.ranking.selector(inventory.clone()));
        let planner = Arc::new(StorePlanner::new(job_store.clone()).with_broker(broker.clone()));

        let batch_service = Arc::new(BatchServiceJobScheduler::new(
            job_store.clone(),
            planner.clone(),
            selector.clone(),
            config.retry.strategy(),
        ));
        let ops = Arc::new(OpsJobScheduler::new(job_store, planner, selector));
        let provider = SchedulerProvider::new()
            .with_scheduler(JobType::Batch, batch_service.clone())
            .with_scheduler(JobType::Service, batch_service)
            .with_scheduler(JobType::Ops, ops);

        let orchestrator = Self {
            config,
            store,
            inventory,
            provider: Arc::new(provider),
            broker,
        };
        (orchestrator, eval_rx)
    }

    pub fn broker(&self) -> EvaluationBroker {
        self.broker.clone()
    }

    /// Spawn the evaluation worker. It stops when `shutdown` is cancelled.
    pub fn spawn_worker(
        &self,
        eval_rx: mpsc::Receiver<Evaluation>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let worker = EvaluationWorker::new(
            self.provider.clone(),
            self.store.clone(),
            self.broker.clone(),
        )
        .with_max_attempts(self.config.max_eval_attempts);
        tokio::spawn(worker.run(eval_rx, shutdown))
    }

    /// Store a new job and queue its first evaluation. Returns the job ID.
    pub async fn submit_job(&self, job: Job) -> Result<String> {
        let job_id = job.id.clone();
        self.store.create_job(job).await?;
        let job = self.store.get_job(&job_id).await?;
        tracing::info!(job_id = %job_id, job_type = %job.job_type, count = job.count, "Job submitted");
        self.broker
            .enqueue(Evaluation::new(&job, EvalTrigger::JobRegister))?;
        Ok(job_id)
    }

    /// Stop a job; its executions are stopped by the evaluation that follows.
    pub async fn stop_job(&self, job_id: &str, reason: &str) -> Result<()> {
        self.store
            .update_job_state(UpdateJobStateRequest {
                job_id: job_id.to_string(),
                condition: UpdateJobCondition {
                    unexpected_states: JobStateType::TERMINAL.to_vec(),
                    ..Default::default()
                },
                new_state: JobStateType::Stopped,
                message: reason.to_string(),
            })
            .await?;
        let job = self.store.get_job(job_id).await?;
        tracing::info!(job_id, reason, "Job stopped");
        self.broker
            .enqueue(Evaluation::new(&job, EvalTrigger::JobUpdate))
    }

    /// Queue an evaluation for a job outside any state change.
    pub async fn evaluate(&self, job_id: &str, trigger: EvalTrigger) -> Result<()> {
        let job = self.store.get_job(job_id).await?;
        self.broker.enqueue(Evaluation::new(&job, trigger))
    }

    pub async fn register_node(&self, node: NodeInfo) {
        self.inventory.upsert(node).await;
    }

    /// Record a node state change and re-evaluate every in-progress job with
    /// a live execution on that node. Returns the number of evaluations queued.
    pub async fn update_node_state(&self, node_id: &str, state: NodeState) -> Result<usize> {
        if !self.inventory.set_state(node_id, state).await {
            tracing::warn!(node_id, "State change for unknown node ignored");
            return Ok(0);
        }

        let mut affected = HashSet::new();
        let mut queued = 0;
        for job in self.store.get_in_progress_jobs().await? {
            let executions = self
                .store
                .get_executions(GetExecutionsOptions::for_job(&job.id))
                .await?;
            let on_node = executions
                .iter()
                .any(|e| e.node_id == node_id && !e.is_terminal());
            if on_node && affected.insert(job.id.clone()) {
                self.broker
                    .enqueue(Evaluation::new(&job, EvalTrigger::NodeUpdate))?;
                queued += 1;
            }
        }
        tracing::info!(node_id, state = %state, evaluations = queued, "Node state updated");
        Ok(queued)
    }
}
