use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::models::{Job, NodeInfo};
use crate::selection::{NodeRank, Ranker};

pub const RANK_UNSUITABLE: i32 = -1;
pub const RANK_POSSIBLE: i32 = 0;
pub const RANK_PREFERRED: i32 = 10;

/// Requires every job constraint to be present in the node's labels.
#[derive(Debug, Default, Clone)]
pub struct LabelsRanker;

impl LabelsRanker {
    pub fn new() -> Self {
        Self
    }
}

impl Ranker for LabelsRanker {
    fn rank_nodes(&self, job: &Job, _min_delay: Duration, nodes: &[NodeInfo]) -> Vec<NodeRank> {
        nodes
            .iter()
            .map(|node| {
                let missing: Vec<&str> = job
                    .constraints
                    .iter()
                    .filter(|(k, v)| node.labels.get(*k) != Some(*v))
                    .map(|(k, _)| k.as_str())
                    .collect();
                if missing.is_empty() {
                    NodeRank::new(node, RANK_POSSIBLE, "node labels match job constraints")
                } else {
                    NodeRank::new(
                        node,
                        RANK_UNSUITABLE,
                        format!("node does not satisfy constraints: {}", missing.join(", ")),
                    )
                }
            })
            .collect()
    }
}

/// Rules out full nodes and prefers nodes with more free slots.
#[derive(Debug, Default, Clone)]
pub struct CapacityRanker;

impl CapacityRanker {
    pub fn new() -> Self {
        Self
    }
}

impl Ranker for CapacityRanker {
    fn rank_nodes(&self, _job: &Job, _min_delay: Duration, nodes: &[NodeInfo]) -> Vec<NodeRank> {
        nodes
            .iter()
            .map(|node| match node.free_slots() {
                None => NodeRank::new(node, RANK_POSSIBLE, "node has unbounded capacity"),
                Some(0) => NodeRank::new(node, RANK_UNSUITABLE, "node is at capacity"),
                Some(free) => {
                    // Scale free share into [1, RANK_PREFERRED].
                    let span = (RANK_PREFERRED - 1) as u64;
                    let share = span * u64::from(free) / u64::from(node.max_executions);
                    let rank = 1 + i32::try_from(share).unwrap_or(RANK_PREFERRED - 1);
                    NodeRank::new(node, rank, format!("node has {free} free slots"))
                }
            })
            .collect()
    }
}

/// Rules out disconnected nodes and nodes that rejected a bid within `min_delay`.
#[derive(Debug, Default, Clone)]
pub struct AvailabilityRanker;

impl AvailabilityRanker {
    pub fn new() -> Self {
        Self
    }
}

impl Ranker for AvailabilityRanker {
    fn rank_nodes(&self, _job: &Job, min_delay: Duration, nodes: &[NodeInfo]) -> Vec<NodeRank> {
        let now = Utc::now();
        let min_delay = chrono::Duration::from_std(min_delay).unwrap_or(chrono::Duration::MAX);
        nodes
            .iter()
            .map(|node| {
                if !node.is_connected() {
                    return NodeRank::new(node, RANK_UNSUITABLE, "node is disconnected");
                }
                match node.last_bid_rejection {
                    Some(at) if now - at < min_delay => NodeRank::new(
                        node,
                        RANK_UNSUITABLE,
                        format!("node rejected a bid at {}", at.to_rfc3339()),
                    ),
                    _ => NodeRank::new(node, RANK_POSSIBLE, "node is available"),
                }
            })
            .collect()
    }
}

/// Adds bounded random noise so equally good nodes share the load.
#[derive(Debug, Clone)]
pub struct RandomRanker {
    spread: i32,
}

impl RandomRanker {
    pub fn new(spread: i32) -> Self {
        Self {
            spread: spread.max(0),
        }
    }
}

impl Ranker for RandomRanker {
    fn rank_nodes(&self, _job: &Job, _min_delay: Duration, nodes: &[NodeInfo]) -> Vec<NodeRank> {
        let mut rng = rand::thread_rng();
        nodes
            .iter()
            .map(|node| {
                let rank = rng.gen_range(0..=self.spread);
                NodeRank::new(node, rank, "random spread")
            })
            .collect()
    }
}

/// Returns preconfigured ranks in node order; nodes past the end rank as possible.
#[derive(Debug, Clone, Default)]
pub struct FixedRanker {
    ranks: Vec<i32>,
}

impl FixedRanker {
    pub fn new(ranks: Vec<i32>) -> Self {
        Self { ranks }
    }
}

impl Ranker for FixedRanker {
    fn rank_nodes(&self, _job: &Job, _min_delay: Duration, nodes: &[NodeInfo]) -> Vec<NodeRank> {
        nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let rank = self.ranks.get(i).copied().unwrap_or(RANK_POSSIBLE);
                NodeRank::new(node, rank, "fixed rank")
            })
            .collect()
    }
}
