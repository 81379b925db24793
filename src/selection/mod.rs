//! Node discovery and ranking-based node selection.

pub mod inventory;
pub mod ranking;
pub mod selector;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Job, NodeInfo};

pub use inventory::NodeInventory;
pub use ranking::{
    AvailabilityRanker, CapacityRanker, FixedRanker, LabelsRanker, RandomRanker,
    RANK_POSSIBLE, RANK_PREFERRED, RANK_UNSUITABLE,
};
pub use selector::RankedNodeSelector;

/// Source of node snapshots, owned by the node-health subsystem.
#[async_trait]
pub trait NodeDiscoverer: Send + Sync {
    async fn all_nodes(&self) -> Result<Vec<NodeInfo>>;
}

/// Picks nodes for a job's executions.
#[async_trait]
pub trait NodeSelector: Send + Sync {
    /// Every node currently known and considered healthy.
    async fn all_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// The best `count` eligible nodes, best first. Fails with
    /// `OrchError::NotEnoughNodes` when fewer than `count` qualify.
    /// `min_delay` excludes nodes that rejected a bid more recently than that.
    async fn top_matching_nodes(
        &self,
        job: &Job,
        count: usize,
        min_delay: Duration,
    ) -> Result<Vec<NodeInfo>>;

    /// Every eligible node, best first.
    async fn all_matching_nodes(&self, job: &Job, min_delay: Duration) -> Result<Vec<NodeInfo>>;
}

/// A node's score from one ranker. Negative ranks disqualify the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRank {
    pub node: NodeInfo,
    pub rank: i32,
    pub reason: String,
}

impl NodeRank {
    pub fn new(node: &NodeInfo, rank: i32, reason: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            rank,
            reason: reason.into(),
        }
    }

    pub fn meets_requirement(&self) -> bool {
        self.rank >= RANK_POSSIBLE
    }
}

/// One stage of the scoring pipeline. Returns one rank per input node.
pub trait Ranker: Send + Sync {
    fn rank_nodes(&self, job: &Job, min_delay: Duration, nodes: &[NodeInfo]) -> Vec<NodeRank>;
}
