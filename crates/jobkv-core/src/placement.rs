use std::time::Duration;

use jobkv_model::{NodeRank, RankMap, Scope, TaskRank};
use tracing::{debug, info};

use crate::{CoreError, Keyspace};

/// Key of the published rank map in the job's `cluster` scope.
pub const RANK_MAP_KEY: &str = "rank_map";

/// Where the job's tasks run, as seen from the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    nodes: Vec<String>,
    node_rank: Option<NodeRank>,
    rank_map: RankMap,
}

impl Placement {
    pub fn new(nodes: Vec<String>, node_rank: Option<NodeRank>, rank_map: RankMap) -> Self {
        Self {
            nodes,
            node_rank,
            rank_map,
        }
    }

    /// Position of `host` in the job's node set.
    pub fn locate(nodes: &[String], host: &str) -> Option<NodeRank> {
        nodes.iter().position(|n| n == host)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Rank of the current host, `None` if it is not part of the job.
    #[inline]
    pub fn node_rank(&self) -> Option<NodeRank> {
        self.node_rank
    }

    pub fn rank_map(&self) -> &RankMap {
        &self.rank_map
    }

    /// Returns `true` if task `rank` runs on the current host.
    pub fn is_rank_local(&self, rank: TaskRank) -> bool {
        self.node_rank.is_some() && self.rank_map.node_of(rank) == self.node_rank
    }

    pub fn host_of(&self, rank: TaskRank) -> Option<&str> {
        self.rank_map
            .node_of(rank)
            .and_then(|node| self.nodes.get(node))
            .map(String::as_str)
    }

    pub fn node_rank_of(&self, rank: TaskRank) -> Option<NodeRank> {
        self.rank_map.node_of(rank)
    }

    pub fn position_within_host(&self, rank: TaskRank) -> Option<usize> {
        self.rank_map.position_within_host(rank)
    }
}

impl Keyspace {
    /// Store the job's rank map. Meant to be called by a single process.
    pub async fn publish_rank_map(&self, map: &RankMap) -> Result<(), CoreError> {
        self.write_key(Scope::Cluster, RANK_MAP_KEY, &map.encode())
            .await?;
        info!(tasks = map.len(), "published rank map");
        Ok(())
    }

    /// Fetch the job's rank map, waiting for it to be published.
    pub async fn load_rank_map(&self, timeout: Option<Duration>) -> Result<RankMap, CoreError> {
        let raw = self
            .read_key(Scope::Cluster, RANK_MAP_KEY, true, timeout)
            .await?
            .ok_or_else(|| CoreError::Batch("unable to load rank map".into()))?;
        let map = RankMap::decode(&raw)
            .map_err(|e| CoreError::Batch(format!("unable to load rank map: {e}")))?;
        if !map.is_contiguous() {
            return Err(CoreError::Batch(
                "unable to load rank map: tasks of a node are not contiguous".into(),
            ));
        }
        debug!(tasks = map.len(), "loaded rank map");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use jobkv_store::MemoryStore;

    use super::*;
    use crate::keyspace::testing::keyspace;

    fn nodes() -> Vec<String> {
        ["n0", "n1", "n2"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn queries_on_example_distribution() {
        let map = RankMap::from_distribution("4(x2),2").unwrap();
        assert_eq!(map.entries(), [0, 0, 0, 0, 1, 1, 1, 1, 2, 2]);

        let on_n1 = Placement::new(nodes(), Some(1), map.clone());
        assert!(on_n1.is_rank_local(5));
        assert!(!on_n1.is_rank_local(3));
        assert_eq!(on_n1.position_within_host(5), Some(1));
        assert_eq!(on_n1.position_within_host(4), Some(0));
        assert_eq!(on_n1.host_of(9), Some("n2"));
        assert_eq!(on_n1.node_rank_of(0), Some(0));
        assert_eq!(on_n1.host_of(10), None);

        let on_n0 = Placement::new(nodes(), Some(0), map.clone());
        assert!(!on_n0.is_rank_local(5));

        let elsewhere = Placement::new(nodes(), None, map);
        assert!((0..10).all(|r| !elsewhere.is_rank_local(r)));
    }

    #[test]
    fn locate_host() {
        assert_eq!(Placement::locate(&nodes(), "n2"), Some(2));
        assert_eq!(Placement::locate(&nodes(), "login"), None);
    }

    #[tokio::test]
    async fn load_waits_for_publication() {
        let store = MemoryStore::new();
        let reader = keyspace(&store, 8).await;
        let writer = keyspace(&store, 8).await;
        let map = RankMap::from_distribution("2,3").unwrap();

        let published = map.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.publish_rank_map(&published).await.unwrap();
        });

        let loaded = reader
            .load_rank_map(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(loaded, map);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_rank_map_is_a_batch_error() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 8).await;
        ks.write_key(Scope::Cluster, RANK_MAP_KEY, "not json")
            .await
            .unwrap();
        assert!(matches!(
            ks.load_rank_map(None).await,
            Err(CoreError::Batch(_))
        ));
    }

    #[tokio::test]
    async fn interleaved_rank_map_is_refused() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 8).await;
        ks.write_key(Scope::Cluster, RANK_MAP_KEY, "[0,1,0]")
            .await
            .unwrap();
        match ks.load_rank_map(None).await {
            Err(CoreError::Batch(msg)) => assert!(msg.contains("not contiguous")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
