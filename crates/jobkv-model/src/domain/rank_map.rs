use serde::{Deserialize, Serialize};

use crate::{ModelError, NodeRank, TaskRank};

/// Mapping from global task rank to the node rank hosting that task.
///
/// Index is the task rank, value is the node rank. Tasks placed on the same
/// node always occupy a contiguous range of ranks: the scheduler hands out
/// ranks node by node (block distribution), and [`RankMap::position_within_host`]
/// relies on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankMap(Vec<NodeRank>);

impl RankMap {
    /// Expand a per-node task distribution string.
    ///
    /// The string is a comma separated list of node blocks. Each block is
    /// either a bare task count (`"4"`, one node running four tasks) or the
    /// compressed form `"count(xN)"` meaning `N` consecutive nodes each running
    /// `count` tasks. `"4(x2),2"` therefore expands to
    /// `[0, 0, 0, 0, 1, 1, 1, 1, 2, 2]`.
    pub fn from_distribution(distribution: &str) -> Result<Self, ModelError> {
        let distribution = distribution.trim();
        if distribution.is_empty() {
            return Err(ModelError::InvalidDistribution("empty".into()));
        }

        let mut map = Vec::new();
        let mut node: NodeRank = 0;

        for block in distribution.split(',') {
            let (tasks, nodes) = parse_block(block.trim())?;
            for _ in 0..nodes {
                map.extend(std::iter::repeat_n(node, tasks));
                node += 1;
            }
        }
        Ok(Self(map))
    }

    /// Number of tasks in the job.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[NodeRank] {
        &self.0
    }

    /// Node rank hosting `rank`, or `None` if the rank is outside the job.
    #[inline]
    pub fn node_of(&self, rank: TaskRank) -> Option<NodeRank> {
        self.0.get(rank).copied()
    }

    /// Zero-based offset of `rank` inside the block of tasks sharing its host.
    pub fn position_within_host(&self, rank: TaskRank) -> Option<usize> {
        let host = self.node_of(rank)?;
        let offset = self.0[..=rank]
            .iter()
            .rev()
            .take_while(|&&node| node == host)
            .count();
        Some(offset - 1)
    }

    /// Returns `true` if every node's tasks form one contiguous run.
    pub fn is_contiguous(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut previous = None;
        for &node in &self.0 {
            if previous != Some(node) && !seen.insert(node) {
                return false;
            }
            previous = Some(node);
        }
        true
    }

    /// Serialize to the single value stored in the keystore.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    /// Parse a value previously produced by [`RankMap::encode`].
    pub fn decode(raw: &str) -> Result<Self, ModelError> {
        serde_json::from_str(raw.trim()).map_err(|e| ModelError::InvalidRankMap(e.to_string()))
    }
}

fn parse_block(block: &str) -> Result<(usize, usize), ModelError> {
    let invalid = || ModelError::InvalidDistribution(block.to_string());

    match block.split_once("(x") {
        Some((tasks, rest)) => {
            let nodes = rest.strip_suffix(')').ok_or_else(invalid)?;
            let tasks = tasks.trim().parse().map_err(|_| invalid())?;
            let nodes = nodes.trim().parse().map_err(|_| invalid())?;
            Ok((tasks, nodes))
        }
        None => {
            let tasks = block.parse().map_err(|_| invalid())?;
            Ok((tasks, 1))
        }
    }
}
