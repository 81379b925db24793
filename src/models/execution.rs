use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Job;

/// Compute-side lifecycle of one execution, reported by the node agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutionStateType {
    New,
    AskForBid,
    AskForBidAccepted,
    AskForBidRejected,
    BidAccepted,
    BidRejected,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStateType {
    pub const TERMINAL: [ExecutionStateType; 5] = [
        ExecutionStateType::AskForBidRejected,
        ExecutionStateType::BidRejected,
        ExecutionStateType::Completed,
        ExecutionStateType::Failed,
        ExecutionStateType::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl std::fmt::Display for ExecutionStateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStateType::New => "new",
            ExecutionStateType::AskForBid => "ask_for_bid",
            ExecutionStateType::AskForBidAccepted => "ask_for_bid_accepted",
            ExecutionStateType::AskForBidRejected => "ask_for_bid_rejected",
            ExecutionStateType::BidAccepted => "bid_accepted",
            ExecutionStateType::BidRejected => "bid_rejected",
            ExecutionStateType::Completed => "completed",
            ExecutionStateType::Failed => "failed",
            ExecutionStateType::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What the orchestrator wants the execution to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionDesiredStateType {
    Pending,
    Running,
    Stopped,
}

impl std::fmt::Display for ExecutionDesiredStateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionDesiredStateType::Pending => write!(f, "pending"),
            ExecutionDesiredStateType::Running => write!(f, "running"),
            ExecutionDesiredStateType::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub state_type: ExecutionStateType,
    pub message: String,
}

impl ExecutionState {
    pub fn new(state_type: ExecutionStateType) -> Self {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDesiredState {
    pub state_type: ExecutionDesiredStateType,
    pub message: String,
}

impl ExecutionDesiredState {
    pub fn new(state_type: ExecutionDesiredStateType) -> Self {
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

/// One attempt to run a job on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub job_id: String,
    /// Evaluation that created this execution.
    pub eval_id: String,
    pub namespace: String,
    pub node_id: String,
    pub compute_state: ExecutionState,
    pub desired_state: ExecutionDesiredState,
    pub revision: u64,
    pub create_time: DateTime<Utc>,
    pub modify_time: DateTime<Utc>,
}

impl Execution {
    /// A fresh execution in `New`, desired `Pending`, not yet bound to a node.
    pub fn new(job: &Job, eval_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("e-{}", Uuid::new_v4()),
            job_id: job.id.clone(),
            eval_id: eval_id.into(),
            namespace: job.namespace.clone(),
            node_id: String::new(),
            compute_state: ExecutionState::new(ExecutionStateType::New),
            desired_state: ExecutionDesiredState::new(ExecutionDesiredStateType::Pending),
            revision: 0,
            create_time: now,
            modify_time: now,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_compute_state(mut self, state_type: ExecutionStateType) -> Self {
        self.compute_state = ExecutionState::new(state_type);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.compute_state.state_type.is_terminal()
    }

    /// Accepted by its node and waiting for the orchestrator's approval.
    pub fn is_awaiting_approval(&self) -> bool {
        self.compute_state.state_type == ExecutionStateType::AskForBidAccepted
            && self.desired_state.state_type == ExecutionDesiredStateType::Pending
    }
}
