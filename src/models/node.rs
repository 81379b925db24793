use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Connected,
    Disconnected,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Connected => write!(f, "connected"),
            NodeState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Snapshot of a compute node as advertised to the orchestrator.
///
/// Owned by the node-health subsystem; schedulers treat it as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub state: NodeState,
    /// Maximum concurrent executions, zero for unbounded.
    pub max_executions: u32,
    pub running_executions: u32,
    /// Last time this node rejected a bid, if ever.
    pub last_bid_rejection: Option<DateTime<Utc>>,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
            state: NodeState::Connected,
            max_executions: 0,
            running_executions: 0,
            last_bid_rejection: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_capacity(mut self, max_executions: u32, running_executions: u32) -> Self {
        self.max_executions = max_executions;
        self.running_executions = running_executions;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state == NodeState::Connected
    }

    /// Free execution slots, `None` when unbounded.
    pub fn free_slots(&self) -> Option<u32> {
        if self.max_executions == 0 {
            None
        } else {
            Some(self.max_executions.saturating_sub(self.running_executions))
        }
    }
}
