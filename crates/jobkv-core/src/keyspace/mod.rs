//! Namespaced keystore operations.
//!
//! Every call resolves its path through the [`KeyNamespace`] and runs through
//! [`Connection::call`], so credential renewal applies uniformly to reads,
//! writes, deletes, directory creation and watches.

mod atomic;
pub use atomic::Attempt;

mod lifecycle;
pub use lifecycle::CLUSTER_TTL;

mod watch;
pub use watch::WatchConfig;

use std::sync::Arc;

use jobkv_model::{Scope, StoreNode};
use jobkv_store::{DeleteOptions, StoreError, WriteOptions};
use tracing::debug;

use crate::{Connection, CoreError, KeyNamespace};

#[derive(Clone)]
pub struct Keyspace {
    conn: Arc<Connection>,
    ns: KeyNamespace,
    watch: WatchConfig,
}

impl Keyspace {
    pub fn new(conn: Arc<Connection>, ns: KeyNamespace) -> Self {
        Self {
            conn,
            ns,
            watch: WatchConfig::default(),
        }
    }

    pub fn with_watch_config(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.ns
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn path(&self, scope: Scope, key: &str) -> Result<String, CoreError> {
        self.ns.resolve(scope, key)
    }

    /// Read a key and an index.
    ///
    /// By default the index is suitable as a watch baseline (the highest of
    /// the entry's modification index and the store index). Pass
    /// `real_index` to get the entry's own modification index, as needed
    /// for compare-and-swap. A missing key reads as `None` with the store
    /// index.
    pub async fn read_key_index(
        &self,
        scope: Scope,
        key: &str,
        real_index: bool,
    ) -> Result<(Option<String>, u64), CoreError> {
        let path = self.path(scope, key)?;
        self.read_path_index(&path, real_index).await
    }

    pub(crate) async fn read_path_index(
        &self,
        path: &str,
        real_index: bool,
    ) -> Result<(Option<String>, u64), CoreError> {
        let store = self.conn.store();
        match self.conn.call(|| store.get(path, false)).await {
            Ok(fetched) => {
                let modified = fetched.node.modified_index;
                let index = if real_index {
                    modified
                } else {
                    modified.max(fetched.store_index)
                };
                Ok((fetched.node.value, index))
            }
            Err(CoreError::Store(StoreError::KeyNotFound { index, .. })) => Ok((None, index)),
            Err(e) => Err(e),
        }
    }

    /// Read a whole directory tree and a watch baseline index.
    pub async fn read_dir_index(
        &self,
        scope: Scope,
        key: &str,
    ) -> Result<(Option<StoreNode>, u64), CoreError> {
        let path = self.path(scope, key)?;
        let store = self.conn.store();
        match self.conn.call(|| store.get(&path, true)).await {
            Ok(fetched) => {
                let index = fetched.node.modified_index.max(fetched.store_index);
                Ok((Some(fetched.node), index))
            }
            Err(CoreError::Store(StoreError::KeyNotFound { index, .. })) => Ok((None, index)),
            Err(e) => Err(e),
        }
    }

    pub async fn read_dir(&self, scope: Scope, key: &str) -> Result<Option<StoreNode>, CoreError> {
        Ok(self.read_dir_index(scope, key).await?.0)
    }

    pub async fn write_key(
        &self,
        scope: Scope,
        key: &str,
        value: &str,
    ) -> Result<StoreNode, CoreError> {
        let path = self.path(scope, key)?;
        self.write_path(&path, Some(value), &WriteOptions::default())
            .await
    }

    /// Compare-and-swap write against `index`.
    pub async fn write_key_index(
        &self,
        scope: Scope,
        key: &str,
        value: &str,
        index: u64,
    ) -> Result<StoreNode, CoreError> {
        let path = self.path(scope, key)?;
        self.write_path(&path, Some(value), &WriteOptions::if_index(index))
            .await
    }

    /// Create-only write.
    pub async fn write_key_new(
        &self,
        scope: Scope,
        key: &str,
        value: &str,
    ) -> Result<StoreNode, CoreError> {
        let path = self.path(scope, key)?;
        self.write_path(&path, Some(value), &WriteOptions::if_absent())
            .await
    }

    pub async fn make_dir(&self, scope: Scope, key: &str) -> Result<(), CoreError> {
        let path = self.path(scope, key)?;
        self.write_path(&path, None, &WriteOptions::directory())
            .await
            .map(drop)
    }

    pub(crate) async fn write_path(
        &self,
        path: &str,
        value: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<StoreNode, CoreError> {
        let store = self.conn.store();
        self.conn
            .call(|| store.set(path, value, opts))
            .await
            .map(|fetched| fetched.node)
    }

    /// Delete a plain key. Fails on directories.
    pub async fn delete_key(&self, scope: Scope, key: &str) -> Result<(), CoreError> {
        let path = self.path(scope, key)?;
        self.delete_path(&path, &DeleteOptions::default()).await
    }

    /// Delete a directory and everything below it. A plain key at that path
    /// is deleted as well.
    pub async fn delete_dir(&self, scope: Scope, key: &str) -> Result<(), CoreError> {
        let path = self.path(scope, key)?;
        match self.delete_path(&path, &DeleteOptions::tree()).await {
            Err(CoreError::Store(StoreError::NotADirectory { .. })) => {
                debug!(key = %path, "not a directory, deleting as a key");
                self.delete_key(scope, key).await
            }
            other => other,
        }
    }

    pub(crate) async fn delete_path(
        &self,
        path: &str,
        opts: &DeleteOptions,
    ) -> Result<(), CoreError> {
        let store = self.conn.store();
        self.conn
            .call(|| store.delete(path, opts))
            .await
            .map(drop)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use jobkv_store::MemoryStore;

    use super::*;
    use crate::{ConnectionConfig, CredentialSource};

    pub(crate) struct Fixed;

    #[async_trait]
    impl CredentialSource for Fixed {
        async fn credential(&self) -> Result<String, CoreError> {
            Ok("secret".into())
        }
    }

    pub(crate) async fn keyspace(store: &MemoryStore, batch_id: u64) -> Keyspace {
        keyspace_for(store, "alice", "alice", batch_id).await
    }

    /// Keyspace of `job_user`'s job, authenticated as `login` with the
    /// password `secret`.
    pub(crate) async fn keyspace_for(
        store: &MemoryStore,
        login: &str,
        job_user: &str,
        batch_id: u64,
    ) -> Keyspace {
        let conn = Connection::open(
            Arc::new(store.session()),
            Arc::new(Fixed),
            login.into(),
            ConnectionConfig::default(),
        )
        .await
        .unwrap();
        Keyspace::new(Arc::new(conn), KeyNamespace::new("pcocc", job_user, batch_id))
    }
}

#[cfg(test)]
mod tests {
    use jobkv_store::MemoryStore;

    use super::testing::keyspace;
    use super::*;

    #[tokio::test]
    async fn read_missing_key_returns_store_index() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 12).await;
        ks.write_key(Scope::Global, "other", "x").await.unwrap();

        let (value, index) = ks.read_key_index(Scope::Cluster, "k", false).await.unwrap();
        assert_eq!(value, None);
        assert_eq!(index, 1);
    }

    #[tokio::test]
    async fn watch_index_versus_real_index() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 12).await;
        ks.write_key(Scope::Cluster, "k", "v").await.unwrap();
        ks.write_key(Scope::Cluster, "other", "w").await.unwrap();

        let (value, watch_index) = ks.read_key_index(Scope::Cluster, "k", false).await.unwrap();
        assert_eq!(value.as_deref(), Some("v"));
        assert_eq!(watch_index, 2);

        let (_, real) = ks.read_key_index(Scope::Cluster, "k", true).await.unwrap();
        assert_eq!(real, 1);
    }

    #[tokio::test]
    async fn conditional_writes_surface_races() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 12).await;

        let node = ks.write_key_new(Scope::Cluster, "k", "a").await.unwrap();
        let err = ks.write_key_new(Scope::Cluster, "k", "b").await.unwrap_err();
        assert!(err.as_store().is_some_and(StoreError::is_race));

        let err = ks
            .write_key_index(Scope::Cluster, "k", "b", node.modified_index + 1)
            .await
            .unwrap_err();
        assert!(err.as_store().is_some_and(StoreError::is_race));

        ks.write_key_index(Scope::Cluster, "k", "b", node.modified_index)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn directories() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 12).await;

        ks.make_dir(Scope::ClusterUser, "").await.unwrap();
        ks.write_key(Scope::ClusterUser, "vm0/state", "up").await.unwrap();
        ks.write_key(Scope::ClusterUser, "vm1/state", "up").await.unwrap();

        let dir = ks.read_dir(Scope::ClusterUser, "").await.unwrap().unwrap();
        assert_eq!(dir.children().len(), 2);
        assert_eq!(dir.children()[0].children()[0].value.as_deref(), Some("up"));

        assert!(ks.delete_key(Scope::ClusterUser, "vm0").await.is_err());
        ks.delete_dir(Scope::ClusterUser, "vm0").await.unwrap();
        ks.delete_dir(Scope::ClusterUser, "vm1/state").await.unwrap();

        let dir = ks.read_dir(Scope::ClusterUser, "").await.unwrap().unwrap();
        let names: Vec<_> = dir.children().iter().map(|n| n.name()).collect();
        assert_eq!(names, ["vm1"]);
        assert!(dir.children()[0].children().is_empty());

        assert!(ks.read_dir(Scope::Cluster, "absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_scopes_reject_missing_job() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 0).await;
        assert!(matches!(
            ks.write_key(Scope::Cluster, "k", "v").await,
            Err(CoreError::NoJob)
        ));
        ks.write_key(Scope::GlobalUser, "k", "v").await.unwrap();
    }
}
