use std::{future::Future, sync::Arc, time::Duration};

use jobkv_store::{EtcdConfig, EtcdStore, KeyStore, StoreError};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::{CoreError, CredentialSource};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Minimum delay between two credential renewals (default: 15 seconds).
    pub renew_cooldown: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            renew_cooldown: Duration::from_secs(15),
        }
    }
}

enum Backend {
    Etcd(EtcdConfig),
    Provided(Arc<dyn KeyStore>),
}

/// Everything needed to open a [`Connection`] later, on first use.
pub struct Connector {
    backend: Backend,
    credentials: Arc<dyn CredentialSource>,
    username: String,
    cfg: ConnectionConfig,
}

impl Connector {
    /// Connector for an etcd cluster.
    pub fn etcd(
        etcd: EtcdConfig,
        credentials: Arc<dyn CredentialSource>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            backend: Backend::Etcd(etcd),
            credentials,
            username: username.into(),
            cfg: ConnectionConfig::default(),
        }
    }

    /// Connector for an already constructed store.
    pub fn with_store(
        store: Arc<dyn KeyStore>,
        credentials: Arc<dyn CredentialSource>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            backend: Backend::Provided(store),
            credentials,
            username: username.into(),
            cfg: ConnectionConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: ConnectionConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialSource> {
        &self.credentials
    }

    pub async fn connect(&self) -> Result<Connection, CoreError> {
        let store: Arc<dyn KeyStore> = match &self.backend {
            Backend::Etcd(etcd) => {
                debug!(endpoints = ?etcd.endpoints, "starting keystore client");
                Arc::new(EtcdStore::new(etcd.clone())?)
            }
            Backend::Provided(store) => Arc::clone(store),
        };
        Connection::open(
            store,
            Arc::clone(&self.credentials),
            self.username.clone(),
            self.cfg.clone(),
        )
        .await
    }
}

/// Authenticated handle on the keystore.
///
/// Every store call goes through [`Connection::call`], which renews the
/// credential once and retries when the store reports it as expired.
pub struct Connection {
    store: Arc<dyn KeyStore>,
    credentials: Arc<dyn CredentialSource>,
    username: String,
    cfg: ConnectionConfig,
    last_renew: Mutex<Instant>,
}

impl Connection {
    pub async fn open(
        store: Arc<dyn KeyStore>,
        credentials: Arc<dyn CredentialSource>,
        username: String,
        cfg: ConnectionConfig,
    ) -> Result<Self, CoreError> {
        let secret = credentials.credential().await?;
        store.set_credentials(&username, &secret);
        info!(user = %username, "started keystore client");

        Ok(Self {
            store,
            credentials,
            username,
            cfg,
            last_renew: Mutex::new(Instant::now()),
        })
    }

    pub fn store(&self) -> &dyn KeyStore {
        self.store.as_ref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Run a store operation, renewing the credential and retrying once if
    /// the store rejected it as expired.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match op().await {
            Err(e) if e.is_auth_expired() => {
                debug!(error = %e, "keystore credential rejected");
                self.renew_credential().await?;
                op().await.map_err(CoreError::from)
            }
            other => other.map_err(CoreError::from),
        }
    }

    /// Fetch a fresh credential and present it from now on.
    ///
    /// Fails with [`CoreError::Credential`] when the previous renewal (or
    /// the initial connection) happened less than the cooldown ago.
    pub async fn renew_credential(&self) -> Result<(), CoreError> {
        let mut last = self.last_renew.lock().await;
        if last.elapsed() <= self.cfg.renew_cooldown {
            return Err(CoreError::Credential("access denied".into()));
        }

        debug!("renewing keystore credential");
        *last = Instant::now();
        let secret = self.credentials.renew().await?;
        self.store.set_credentials(&self.username, &secret);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use jobkv_store::MemoryStore;

    use super::*;

    /// Hands out queued secrets, repeating the last one.
    struct Queue(StdMutex<Vec<&'static str>>);

    #[async_trait]
    impl CredentialSource for Queue {
        async fn credential(&self) -> Result<String, CoreError> {
            let mut queue = self.0.lock().unwrap();
            let next = if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0]
            };
            Ok(next.to_string())
        }
    }

    fn queue(secrets: &[&'static str]) -> Arc<Queue> {
        Arc::new(Queue(StdMutex::new(secrets.to_vec())))
    }

    fn short_cooldown() -> ConnectionConfig {
        ConnectionConfig {
            renew_cooldown: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn renewal_respects_cooldown() {
        let store = Arc::new(MemoryStore::new());
        let conn = Connection::open(store, queue(&["a"]), "alice".into(), short_cooldown())
            .await
            .unwrap();

        assert!(matches!(
            conn.renew_credential().await,
            Err(CoreError::Credential(_))
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        conn.renew_credential().await.unwrap();
        assert!(matches!(
            conn.renew_credential().await,
            Err(CoreError::Credential(_))
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        conn.renew_credential().await.unwrap();
    }

    #[tokio::test]
    async fn expired_credential_is_renewed_once() {
        let backing = MemoryStore::with_auth();
        backing.set_password("alice", "new").await;

        let conn = Connection::open(
            Arc::new(backing.session()),
            queue(&["old", "new"]),
            "alice".into(),
            short_cooldown(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let store = conn.store();
        let err = conn
            .call(|| store.get("/missing", false))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Store(StoreError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn renewal_storm_is_refused() {
        let backing = MemoryStore::with_auth();
        backing.set_password("alice", "right").await;

        let conn = Connection::open(
            Arc::new(backing.session()),
            queue(&["wrong"]),
            "alice".into(),
            ConnectionConfig::default(),
        )
        .await
        .unwrap();

        let store = conn.store();
        let err = conn.call(|| store.get("/k", false)).await.unwrap_err();
        assert!(matches!(err, CoreError::Credential(ref m) if m == "access denied"));
    }

    #[tokio::test]
    async fn other_errors_pass_through() {
        let store = Arc::new(MemoryStore::new());
        let conn = Connection::open(store, queue(&["a"]), "alice".into(), short_cooldown())
            .await
            .unwrap();

        let store = conn.store();
        let err = conn.call(|| store.get("/nope", false)).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Store(StoreError::KeyNotFound { .. })
        ));
    }
}
