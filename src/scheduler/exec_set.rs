use std::collections::{BTreeMap, HashMap};

use crate::models::{Execution, ExecutionStateType, NodeInfo, Plan, StopReason};

/// Executions of a single job keyed by ID.
///
/// All operations are pure; they derive new sets or stage entries in a
/// [`Plan`], never touching the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecSet {
    executions: BTreeMap<String, Execution>,
}

/// Result of [`ExecSet::filter_by_approval_status`].
#[derive(Debug, Clone, Default)]
pub struct ExecSetsByApprovalStatus {
    /// Confirmed running (`BidAccepted`).
    pub running: ExecSet,
    /// Accepted by their node and admissible within the desired count.
    pub to_approve: ExecSet,
    /// Accepted by their node after capacity was already filled.
    pub to_reject: ExecSet,
    /// Everything else non-terminal: bids still outstanding or approvals in flight.
    pub pending: ExecSet,
}

impl ExecSetsByApprovalStatus {
    /// Executions that count toward the job's desired count.
    pub fn active_count(&self) -> usize {
        self.running.len() + self.to_approve.len() + self.pending.len()
    }
}

impl FromIterator<Execution> for ExecSet {
    fn from_iter<I: IntoIterator<Item = Execution>>(iter: I) -> Self {
        Self {
            executions: iter.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }
}

impl ExecSet {
    pub fn from_executions(executions: &[Execution]) -> Self {
        executions.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.executions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Execution> {
        self.executions.get(id)
    }

    /// Iterate in execution ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Execution> {
        self.executions.values()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.executions.keys().map(String::as_str).collect()
    }

    fn filter(&self, pred: impl Fn(&Execution) -> bool) -> Self {
        self.iter().filter(|e| pred(e)).cloned().collect()
    }

    pub fn filter_non_terminal(&self) -> Self {
        self.filter(|e| !e.is_terminal())
    }

    pub fn filter_failed(&self) -> Self {
        self.filter(|e| e.compute_state.state_type == ExecutionStateType::Failed)
    }

    pub fn count_completed(&self) -> usize {
        self.iter()
            .filter(|e| e.compute_state.state_type == ExecutionStateType::Completed)
            .count()
    }

    /// Executions whose node turned down the bid request.
    pub fn count_rejected_bids(&self) -> usize {
        self.iter()
            .filter(|e| e.compute_state.state_type == ExecutionStateType::AskForBidRejected)
            .count()
    }

    /// Split into (healthy, lost). An execution is lost when its node is not
    /// among `nodes` or is reported disconnected.
    pub fn filter_by_node_health(&self, nodes: &[NodeInfo]) -> (Self, Self) {
        let connected: HashMap<&str, bool> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.is_connected()))
            .collect();
        let (healthy, lost): (Vec<&Execution>, Vec<&Execution>) = self
            .iter()
            .partition(|e| connected.get(e.node_id.as_str()).copied().unwrap_or(false));
        (
            healthy.into_iter().cloned().collect(),
            lost.into_iter().cloned().collect(),
        )
    }

    /// Partition by approval status against `desired`. Executions awaiting
    /// approval are admitted earliest `modify_time` first (ties by ID) while
    /// `running + pending + to_approve < desired`, so approving never pushes
    /// the active count past `desired`.
    pub fn filter_by_approval_status(&self, desired: usize) -> ExecSetsByApprovalStatus {
        let mut result = ExecSetsByApprovalStatus::default();
        let mut awaiting: Vec<&Execution> = Vec::new();

        for exec in self.iter().filter(|e| !e.is_terminal()) {
            if exec.compute_state.state_type == ExecutionStateType::BidAccepted {
                result.running.insert(exec.clone());
            } else if exec.is_awaiting_approval() {
                awaiting.push(exec);
            } else {
                result.pending.insert(exec.clone());
            }
        }

        awaiting.sort_by(|a, b| {
            a.modify_time
                .cmp(&b.modify_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        for exec in awaiting {
            if result.active_count() < desired {
                result.to_approve.insert(exec.clone());
            } else {
                result.to_reject.insert(exec.clone());
            }
        }
        result
    }

    /// Split into (kept, excess) so that at most `desired` are kept. The
    /// earliest created survive; ties go to earlier `modify_time`, then ID.
    pub fn filter_by_over_subscriptions(&self, desired: usize) -> (Self, Self) {
        if self.len() <= desired {
            return (self.clone(), Self::default());
        }
        let mut ordered: Vec<&Execution> = self.iter().collect();
        ordered.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.modify_time.cmp(&b.modify_time))
                .then_with(|| a.id.cmp(&b.id))
        });
        let excess = ordered.split_off(desired);
        (
            ordered.into_iter().cloned().collect(),
            excess.into_iter().cloned().collect(),
        )
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for exec in other.iter() {
            merged.insert(exec.clone());
        }
        merged
    }

    /// The most recently modified execution, ties broken by the larger ID.
    pub fn latest(&self) -> Option<&Execution> {
        self.iter().max_by(|a, b| {
            a.modify_time
                .cmp(&b.modify_time)
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    pub fn mark_approved(&self, plan: &mut Plan) {
        for exec in self.iter() {
            plan.append_approved_execution(exec);
        }
    }

    pub fn mark_stopped(&self, reason: StopReason, plan: &mut Plan) {
        for exec in self.iter() {
            plan.append_stopped_execution(exec, reason);
        }
    }

    fn insert(&mut self, execution: Execution) {
        self.executions.insert(execution.id.clone(), execution);
    }
}
