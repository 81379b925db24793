use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{NodeInfo, NodeState};
use crate::selection::NodeDiscoverer;

/// In-memory view of the cluster's nodes.
///
/// Snapshots are pushed in by whatever tracks node health; the inventory only
/// answers queries. Disconnected nodes are kept but not reported as healthy.
#[derive(Debug, Default)]
pub struct NodeInventory {
    nodes: RwLock<HashMap<String, NodeInfo>>,
}

impl NodeInventory {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Register a node or replace its snapshot.
    pub async fn upsert(&self, node: NodeInfo) {
        tracing::debug!(node_id = %node.id, state = %node.state, "Node registered");
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    pub async fn set_state(&self, node_id: &str, state: NodeState) -> bool {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.state = state;
            tracing::info!(node_id, state = %state, "Node state changed");
            true
        } else {
            false
        }
    }

    /// Note that a node just rejected a bid.
    pub async fn record_bid_rejection(&self, node_id: &str) -> bool {
        if let Some(node) = self.nodes.write().await.get_mut(node_id) {
            node.last_bid_rejection = Some(Utc::now());
            true
        } else {
            false
        }
    }

    /// Connected nodes, sorted by ID.
    pub async fn connected_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.is_connected())
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }
}

#[async_trait]
impl NodeDiscoverer for NodeInventory {
    async fn all_nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.connected_nodes().await)
    }
}
