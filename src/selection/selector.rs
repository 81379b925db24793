use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{OrchError, Result};
use crate::models::{Job, NodeInfo};
use crate::selection::{NodeDiscoverer, NodeRank, NodeSelector, Ranker};

/// Combines the ranks of every ranker per node. A node disqualified by any
/// ranker is dropped; the rest are ordered by total rank, then node ID.
pub struct RankedNodeSelector {
    discoverer: Arc<dyn NodeDiscoverer>,
    rankers: Vec<Box<dyn Ranker>>,
}

impl RankedNodeSelector {
    pub fn new(discoverer: Arc<dyn NodeDiscoverer>) -> Self {
        Self {
            discoverer,
            rankers: Vec::new(),
        }
    }

    pub fn with_ranker(mut self, ranker: impl Ranker + 'static) -> Self {
        self.rankers.push(Box::new(ranker));
        self
    }

    /// Score all known nodes for `job`; returns (eligible best-first, rejection reasons).
    async fn rank(&self, job: &Job, min_delay: Duration) -> Result<(Vec<NodeInfo>, Vec<String>)> {
        let nodes = self.discoverer.all_nodes().await?;

        let mut totals: HashMap<&str, i32> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut reasons: HashMap<&str, Vec<String>> = HashMap::new();
        for ranker in &self.rankers {
            let ranks: Vec<NodeRank> = ranker.rank_nodes(job, min_delay, &nodes);
            for rank in ranks {
                let Some((id, total)) = totals.get_key_value(rank.node.id.as_str()) else {
                    continue;
                };
                let (id, total) = (*id, *total);
                if rank.meets_requirement() {
                    totals.insert(id, total.saturating_add(rank.rank));
                } else {
                    reasons.entry(id).or_default().push(rank.reason);
                }
            }
        }

        let mut eligible: Vec<(i32, &NodeInfo)> = nodes
            .iter()
            .filter(|n| !reasons.contains_key(n.id.as_str()))
            .map(|n| (totals.get(n.id.as_str()).copied().unwrap_or_default(), n))
            .collect();
        eligible.sort_by(|(ra, a), (rb, b)| rb.cmp(ra).then_with(|| a.id.cmp(&b.id)));

        let mut rejected: Vec<String> = reasons
            .into_iter()
            .map(|(id, why)| format!("{id}: {}", why.join("; ")))
            .collect();
        rejected.sort();

        let eligible = eligible.into_iter().map(|(_, n)| n.clone()).collect();
        Ok((eligible, rejected))
    }
}

#[async_trait]
impl NodeSelector for RankedNodeSelector {
    async fn all_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.discoverer.all_nodes().await
    }

    async fn top_matching_nodes(
        &self,
        job: &Job,
        count: usize,
        min_delay: Duration,
    ) -> Result<Vec<NodeInfo>> {
        let (mut eligible, reasons) = self.rank(job, min_delay).await?;
        if eligible.len() < count {
            tracing::debug!(
                job_id = %job.id,
                requested = count,
                matched = eligible.len(),
                "Not enough nodes match job"
            );
            return Err(OrchError::NotEnoughNodes {
                requested: count,
                matched: eligible.len(),
                reasons,
            });
        }
        eligible.truncate(count);
        Ok(eligible)
    }

    async fn all_matching_nodes(&self, job: &Job, min_delay: Duration) -> Result<Vec<NodeInfo>> {
        let (eligible, _) = self.rank(job, min_delay).await?;
        Ok(eligible)
    }
}
