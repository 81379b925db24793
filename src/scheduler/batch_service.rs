use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Evaluation, Execution, Job, JobType, NodeInfo, Plan, StopReason};
use crate::planner::Planner;
use crate::retry::{RetryRequest, RetryStrategy};
use crate::scheduler::exec_set::ExecSet;
use crate::scheduler::Scheduler;
use crate::selection::NodeSelector;
use crate::store::{GetExecutionsOptions, JobStore};

/// Scheduler for batch jobs, which run until `count` executions complete, and
/// service jobs, which keep `count` executions running until stopped.
pub struct BatchServiceJobScheduler {
    store: Arc<dyn JobStore>,
    planner: Arc<dyn Planner>,
    selector: Arc<dyn NodeSelector>,
    retry: Arc<dyn RetryStrategy>,
}

impl BatchServiceJobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        planner: Arc<dyn Planner>,
        selector: Arc<dyn NodeSelector>,
        retry: Arc<dyn RetryStrategy>,
    ) -> Self {
        Self {
            store,
            planner,
            selector,
            retry,
        }
    }

    /// Executions still wanted: the full count for services, the count minus
    /// completions for batch jobs.
    fn desired_remaining(job: &Job, existing: &ExecSet) -> usize {
        match job.job_type {
            JobType::Batch => job.count.saturating_sub(existing.count_completed()),
            _ => job.count,
        }
    }

    /// Place `count` new executions, one per selected node, in rank order.
    async fn create_missing_execs(
        &self,
        job: &Job,
        count: usize,
        min_delay: Duration,
        plan: &mut Plan,
    ) -> Result<()> {
        let nodes: Vec<NodeInfo> = self
            .selector
            .top_matching_nodes(job, count, min_delay)
            .await?;
        for node in nodes.iter().take(count) {
            plan.append_execution(Execution::new(job, &plan.eval_id).with_node(&node.id));
        }
        Ok(())
    }

    /// Stop everything still running and fail the job with the message of the
    /// most recent failure, or `reason` when there is none.
    fn handle_failure(non_terminal: &ExecSet, failed: &ExecSet, plan: &mut Plan, reason: String) {
        non_terminal.mark_stopped(StopReason::JobFailed, plan);
        let message = failed
            .latest()
            .map(|e| e.compute_state.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or(reason);
        tracing::warn!(job_id = %plan.job_id, eval_id = %plan.eval_id, reason = %message, "Failing job");
        plan.mark_job_failed(message);
    }
}

#[async_trait]
impl Scheduler for BatchServiceJobScheduler {
    async fn process(&self, evaluation: &Evaluation) -> Result<()> {
        let job = self.store.get_job(&evaluation.job_id).await?;
        let executions = self
            .store
            .get_executions(GetExecutionsOptions::for_job(&job.id))
            .await?;

        let mut plan = Plan::new(evaluation, &job);
        let existing = ExecSet::from_executions(&executions);
        let non_terminal = existing.filter_non_terminal();

        if job.is_terminal() {
            non_terminal.mark_stopped(StopReason::NotNeeded, &mut plan);
            return self.planner.process(&plan).await;
        }

        let nodes = self.selector.all_nodes().await?;
        let (non_terminal, lost) = non_terminal.filter_by_node_health(&nodes);
        if !lost.is_empty() {
            tracing::info!(job_id = %job.id, lost = lost.len(), "Stopping executions on unavailable nodes");
        }
        lost.mark_stopped(StopReason::Lost, &mut plan);

        let desired = Self::desired_remaining(&job, &existing);

        let by_status = non_terminal.filter_by_approval_status(desired);
        by_status.to_approve.mark_approved(&mut plan);
        by_status.to_reject.mark_stopped(StopReason::Rejected, &mut plan);

        let rejections = existing.count_rejected_bids();
        let backoff = job.rescheduling_policy.retry_delay(rejections);
        if rejections > 0 && !evaluation.is_deferred_retry() {
            tracing::debug!(
                job_id = %job.id,
                eval_id = %evaluation.id,
                rejections,
                delay_secs = backoff.as_secs_f64(),
                "Deferring placement after bid rejections"
            );
            plan.defer_evaluation(backoff);
            return self.planner.process(&plan).await;
        }

        let shortfall = desired.saturating_sub(by_status.active_count());
        if shortfall > 0 {
            let failed = existing.filter_failed().union(&lost);
            if !failed.is_empty() && !self.retry.should_retry(&RetryRequest::new(&job)) {
                Self::handle_failure(
                    &non_terminal,
                    &failed,
                    &mut plan,
                    format!("exceeded max retries for job {}", job.id),
                );
                return self.planner.process(&plan).await;
            }

            let min_delay = if evaluation.is_deferred_retry() && rejections > 0 {
                backoff
            } else {
                Duration::ZERO
            };
            match self
                .create_missing_execs(&job, shortfall, min_delay, &mut plan)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_enough_nodes() => {
                    Self::handle_failure(&non_terminal, &failed, &mut plan, e.to_string());
                    return self.planner.process(&plan).await;
                }
                Err(e) => return Err(e),
            }
        }

        let (running, excess) = by_status.running.filter_by_over_subscriptions(desired);
        excess.mark_stopped(StopReason::NotNeeded, &mut plan);

        if desired == 0 {
            plan.mark_job_completed();
        }
        plan.mark_job_running_if_eligible(!running.is_empty());

        self.planner.process(&plan).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchError;
    use crate::models::{EvalTrigger, ExecutionStateType, JobStateType};
    use crate::retry::FixedStrategy;
    use crate::store::InMemoryJobStore;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CapturingPlanner {
        plans: Mutex<Vec<Plan>>,
    }

    #[async_trait]
    impl Planner for CapturingPlanner {
        async fn process(&self, plan: &Plan) -> Result<()> {
            self.plans.lock().await.push(plan.clone());
            Ok(())
        }
    }

    struct Nodes(Vec<NodeInfo>);

    #[async_trait]
    impl NodeSelector for Nodes {
        async fn all_nodes(&self) -> Result<Vec<NodeInfo>> {
            Ok(self.0.clone())
        }

        async fn top_matching_nodes(
            &self,
            _job: &Job,
            count: usize,
            _min_delay: Duration,
        ) -> Result<Vec<NodeInfo>> {
            if self.0.len() < count {
                return Err(OrchError::NotEnoughNodes {
                    requested: count,
                    matched: self.0.len(),
                    reasons: Vec::new(),
                });
            }
            Ok(self.0[..count].to_vec())
        }

        async fn all_matching_nodes(&self, _job: &Job, _min_delay: Duration) -> Result<Vec<NodeInfo>> {
            Ok(self.0.clone())
        }
    }

    async fn run(job: Job, executions: Vec<Execution>, nodes: usize) -> Plan {
        let store = Arc::new(InMemoryJobStore::new());
        store.create_job(job.clone()).await.unwrap();
        for exec in executions {
            store.create_execution(exec).await.unwrap();
        }
        let planner = Arc::new(CapturingPlanner::default());
        let nodes = (0..nodes).map(|i| NodeInfo::new(format!("node-{i}"))).collect();
        let scheduler = BatchServiceJobScheduler::new(
            store,
            planner.clone(),
            Arc::new(Nodes(nodes)),
            Arc::new(FixedStrategy::new(true)),
        );
        scheduler
            .process(&Evaluation::new(&job, EvalTrigger::JobRegister))
            .await
            .unwrap();
        let plan = planner.plans.lock().await.remove(0);
        plan
    }

    #[tokio::test]
    async fn test_places_missing_executions() {
        let job = Job::new("j", JobType::Batch, 2);
        let plan = run(job, Vec::new(), 3).await;
        let nodes: Vec<&str> = plan.new_executions.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["node-0", "node-1"]);
        assert_eq!(plan.desired_job_state, None);
    }

    #[tokio::test]
    async fn test_batch_completes_when_all_done() {
        let job = Job::new("j", JobType::Batch, 1);
        let done = Execution::new(&job, "e")
            .with_node("node-0")
            .with_compute_state(ExecutionStateType::Completed);
        let plan = run(job, vec![done], 1).await;
        assert!(plan.new_executions.is_empty());
        assert_eq!(plan.desired_job_state, Some(JobStateType::Completed));
    }

    #[tokio::test]
    async fn test_service_ignores_completions() {
        let job = Job::new("s", JobType::Service, 1);
        let done = Execution::new(&job, "e")
            .with_node("node-0")
            .with_compute_state(ExecutionStateType::Completed);
        let plan = run(job, vec![done], 1).await;
        assert_eq!(plan.new_executions.len(), 1);
        assert_eq!(plan.desired_job_state, None);
    }
}
