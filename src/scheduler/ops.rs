use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Evaluation, Execution, Plan, StopReason};
use crate::planner::Planner;
use crate::scheduler::exec_set::ExecSet;
use crate::scheduler::Scheduler;
use crate::selection::NodeSelector;
use crate::store::{GetExecutionsOptions, JobStore};

/// Scheduler for ops jobs: one execution on every matching node, placed once.
/// Any failure fails the whole job; there are no retries.
pub struct OpsJobScheduler {
    store: Arc<dyn JobStore>,
    planner: Arc<dyn Planner>,
    selector: Arc<dyn NodeSelector>,
}

impl OpsJobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        planner: Arc<dyn Planner>,
        selector: Arc<dyn NodeSelector>,
    ) -> Self {
        Self {
            store,
            planner,
            selector,
        }
    }
}

#[async_trait]
impl Scheduler for OpsJobScheduler {
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
        lost.mark_stopped(StopReason::Lost, &mut plan);

        // Every accepted bid is wanted.
        let by_status = non_terminal.filter_by_approval_status(usize::MAX);
        by_status.to_approve.mark_approved(&mut plan);

        let failed = existing.filter_failed().union(&lost);
        if !failed.is_empty() {
            non_terminal.mark_stopped(StopReason::JobFailed, &mut plan);
            let message = failed
                .latest()
                .map(|e| e.compute_state.message.clone())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("ops job {} has failed executions", job.id));
            tracing::warn!(job_id = %job.id, reason = %message, "Failing ops job");
            plan.mark_job_failed(message);
            return self.planner.process(&plan).await;
        }

        if existing.is_empty() {
            let nodes = self
                .selector
                .all_matching_nodes(&job, Duration::ZERO)
                .await?;
            if nodes.is_empty() {
                plan.mark_job_failed(format!("no matching nodes for job {}", job.id));
                return self.planner.process(&plan).await;
            }
            for node in &nodes {
                plan.append_execution(Execution::new(&job, &plan.eval_id).with_node(&node.id));
            }
        } else if non_terminal.is_empty() && existing.count_completed() > 0 {
            plan.mark_job_completed();
        }

        plan.mark_job_running_if_eligible(!by_status.running.is_empty());
        self.planner.process(&plan).await
    }
}
