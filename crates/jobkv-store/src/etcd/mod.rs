//! Keystore client for the etcd v2 HTTP API.

mod wire;

use std::{
    path::PathBuf,
    sync::{
        Mutex as StdMutex, PoisonError, RwLock as StdRwLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use jobkv_model::StoreSettings;
use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use tracing::{debug, warn};

use crate::{
    DeleteOptions, Fetched, KeyStore, RoleGrant, StoreError, StoreUser, WatchOptions, WriteOptions,
};
use wire::{CLUSTER_ID_HEADER, INDEX_HEADER, RoleBody, UserBody, classify, decode_reply, decode_user};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct ClusterIdentity {
    id: Option<String>,
    /// Set when the id changed since the last watch reply.
    changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdConfig {
    /// Base URLs (`scheme://host:port`), tried in order.
    pub endpoints: Vec<String>,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_cert: Option<PathBuf>,
    /// Deadline of every non-watch request.
    pub request_timeout: Duration,
}

impl EtcdConfig {
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            endpoints: settings.endpoints(),
            ca_cert: settings.etcd_ca_cert.clone(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct EtcdStore {
    http: reqwest::Client,
    endpoints: Vec<String>,
    /// Endpoint that answered last.
    active: AtomicUsize,
    request_timeout: Duration,
    credentials: StdRwLock<Option<(String, String)>>,
    cluster: StdMutex<ClusterIdentity>,
}

impl EtcdStore {
    pub fn new(cfg: EtcdConfig) -> Result<Self, StoreError> {
        if cfg.endpoints.is_empty() {
            return Err(StoreError::Transport(
                "no keystore endpoint configured".into(),
            ));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(path) = &cfg.ca_cert {
            let pem = std::fs::read(path)
                .map_err(|e| StoreError::Transport(format!("{}: {e}", path.display())))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| StoreError::Transport(format!("{}: {e}", path.display())))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoints: cfg.endpoints,
            active: AtomicUsize::new(0),
            request_timeout: cfg.request_timeout,
            credentials: StdRwLock::new(None),
            cluster: StdMutex::new(ClusterIdentity::default()),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Send a request, moving on to the next endpoint when one cannot be
    /// reached.
    async fn send<F>(&self, build: F) -> Result<Response, reqwest::Error>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let count = self.endpoints.len();
        let first = self.active.load(Ordering::Relaxed) % count;
        let credentials = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut step = 0;
        loop {
            let slot = (first + step) % count;
            let base = &self.endpoints[slot];
            let mut request = build(base);
            if let Some((user, password)) = &credentials {
                request = request.basic_auth(user, Some(password));
            }

            match request.send().await {
                Ok(response) => {
                    if slot != first {
                        self.active.store(slot, Ordering::Relaxed);
                        warn!(endpoint = %base, "switched keystore endpoint");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_connect() && step + 1 < count => {
                    debug!(endpoint = %base, error = %e, "keystore endpoint unreachable");
                    step += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn keys_url(base: &str, key: &str) -> String {
        if key.starts_with('/') {
            format!("{base}/v2/keys{key}")
        } else {
            format!("{base}/v2/keys/{key}")
        }
    }

    /// Remember the cluster identity seen in a reply.
    ///
    /// A change stays pending until a watch reply consumes it, so a plain
    /// request seeing the new cluster first does not hide it from watchers.
    fn cluster_changed(&self, headers: &HeaderMap, watch: bool) -> bool {
        let mut cluster = self.cluster.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(seen) = headers.get(CLUSTER_ID_HEADER).and_then(|v| v.to_str().ok()) {
            if cluster.id.as_deref().is_some_and(|known| known != seen) {
                cluster.changed = true;
            }
            cluster.id = Some(seen.to_string());
        }
        watch && std::mem::take(&mut cluster.changed)
    }

    async fn reply(&self, key: &str, response: Response, watch: bool) -> Result<Fetched, StoreError> {
        let status = response.status().as_u16();
        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if self.cluster_changed(response.headers(), watch) {
            warn!(key, "keystore cluster identity changed");
            return Err(StoreError::ClusterIdChanged {
                index: index.unwrap_or_default(),
            });
        }
        let body = response.text().await.map_err(transport)?;
        decode_reply(key, status, index, &body)
    }

    async fn expect_ok(&self, what: &str, response: Response) -> Result<Option<String>, StoreError> {
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify(what, status.as_u16(), None, &body));
        }
        Ok(Some(body))
    }

    async fn auth_get(&self, path: &str) -> Result<Option<String>, StoreError> {
        let response = self
            .send(|base| {
                self.http
                    .get(format!("{base}/v2/auth/{path}"))
                    .timeout(self.request_timeout)
            })
            .await
            .map_err(transport)?;
        self.expect_ok(path, response).await
    }

    async fn auth_put<T: serde::Serialize + Sync>(&self, path: &str, body: &T) -> Result<(), StoreError> {
        let response = self
            .send(|base| {
                self.http
                    .put(format!("{base}/v2/auth/{path}"))
                    .json(body)
                    .timeout(self.request_timeout)
            })
            .await
            .map_err(transport)?;
        match self.expect_ok(path, response).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::Rejected {
                error_code: None,
                status: Some(404),
                message: format!("{path} not found"),
            }),
        }
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

fn flag(on: bool) -> &'static str {
    if on { "true" } else { "false" }
}

#[async_trait]
impl KeyStore for EtcdStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Fetched, StoreError> {
        let response = self
            .send(|base| {
                self.http
                    .get(Self::keys_url(base, key))
                    .query(&[("recursive", flag(recursive)), ("sorted", "true")])
                    .timeout(self.request_timeout)
            })
            .await
            .map_err(transport)?;
        self.reply(key, response, false).await
    }

    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<Fetched, StoreError> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if opts.dir {
            form.push(("dir", "true".into()));
        } else {
            form.push(("value", value.unwrap_or_default().to_string()));
        }
        if let Some(index) = opts.prev_index {
            form.push(("prevIndex", index.to_string()));
        }
        if let Some(exists) = opts.prev_exist {
            form.push(("prevExist", flag(exists).into()));
        }
        if let Some(ttl) = opts.ttl {
            form.push(("ttl", ttl.to_string()));
        }

        let response = self
            .send(|base| {
                self.http
                    .put(Self::keys_url(base, key))
                    .form(&form)
                    .timeout(self.request_timeout)
            })
            .await
            .map_err(transport)?;
        self.reply(key, response, false).await
    }

    async fn delete(&self, key: &str, opts: &DeleteOptions) -> Result<Fetched, StoreError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if opts.recursive {
            query.push(("recursive", "true".into()));
        }
        if opts.dir {
            query.push(("dir", "true".into()));
        }
        if let Some(index) = opts.prev_index {
            query.push(("prevIndex", index.to_string()));
        }

        let response = self
            .send(|base| {
                self.http
                    .delete(Self::keys_url(base, key))
                    .query(&query)
                    .timeout(self.request_timeout)
            })
            .await
            .map_err(transport)?;
        self.reply(key, response, false).await
    }

    async fn watch(&self, key: &str, opts: &WatchOptions) -> Result<Fetched, StoreError> {
        let mut query: Vec<(&str, String)> = vec![("wait", "true".into())];
        if opts.recursive {
            query.push(("recursive", "true".into()));
        }
        if let Some(index) = opts.wait_index {
            query.push(("waitIndex", index.to_string()));
        }

        let response = self
            .send(|base| {
                let request = self.http.get(Self::keys_url(base, key)).query(&query);
                match opts.timeout {
                    Some(t) => request.timeout(t),
                    None => request,
                }
            })
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::WatchTimedOut { key: key.into() }
                } else {
                    transport(e)
                }
            })?;
        self.reply(key, response, true).await
    }

    fn set_credentials(&self, username: &str, password: &str) {
        let mut credentials = self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *credentials = Some((username.to_string(), password.to_string()));
    }

    async fn put_role(&self, grant: &RoleGrant) -> Result<(), StoreError> {
        let path = format!("roles/{}", grant.role);
        let exists = self.auth_get(&path).await?.is_some();
        self.auth_put(&path, &RoleBody::new(grant, exists)).await
    }

    async fn get_user(&self, user: &str) -> Result<Option<StoreUser>, StoreError> {
        match self.auth_get(&format!("users/{user}")).await? {
            Some(body) => decode_user(&body).map(Some),
            None => Ok(None),
        }
    }

    async fn put_user(&self, user: &StoreUser) -> Result<(), StoreError> {
        let path = format!("users/{}", user.user);
        let exists = self.auth_get(&path).await?.is_some();
        self.auth_put(&path, &UserBody::new(user, exists)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_url_joins_paths() {
        assert_eq!(
            EtcdStore::keys_url("http://kv:2379", "/pcocc/global/k"),
            "http://kv:2379/v2/keys/pcocc/global/k"
        );
        assert_eq!(
            EtcdStore::keys_url("http://kv:2379", "k"),
            "http://kv:2379/v2/keys/k"
        );
    }

    #[test]
    fn config_follows_settings() {
        let settings: StoreSettings = serde_json::from_str(
            r#"{
                "etcd-servers": ["a", "b"],
                "etcd-client-port": 2379,
                "etcd-protocol": "http",
                "etcd-auth-type": "munge"
            }"#,
        )
        .unwrap();
        let cfg = EtcdConfig::from_settings(&settings);
        assert_eq!(cfg.endpoints, ["http://a:2379", "http://b:2379"]);
        assert!(cfg.ca_cert.is_none());
    }

    #[test]
    fn rejects_empty_endpoint_list() {
        let cfg = EtcdConfig {
            endpoints: Vec::new(),
            ca_cert: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        assert!(matches!(EtcdStore::new(cfg), Err(StoreError::Transport(_))));
    }

    #[test]
    fn missing_ca_bundle_is_reported() {
        let cfg = EtcdConfig {
            endpoints: vec!["https://kv:2379".into()],
            ca_cert: Some(PathBuf::from("/nonexistent/ca.pem")),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        let err = EtcdStore::new(cfg).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn cluster_identity_tracking() {
        let store = EtcdStore::new(EtcdConfig {
            endpoints: vec!["http://127.0.0.1:1".into()],
            ca_cert: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
        .unwrap();

        let mut headers = HeaderMap::new();
        assert!(!store.cluster_changed(&headers, true));

        headers.insert(CLUSTER_ID_HEADER, "aaaa".parse().unwrap());
        assert!(!store.cluster_changed(&headers, true));
        assert!(!store.cluster_changed(&headers, true));

        headers.insert(CLUSTER_ID_HEADER, "bbbb".parse().unwrap());
        assert!(store.cluster_changed(&headers, true));
        assert!(!store.cluster_changed(&headers, true));
    }

    #[test]
    fn cluster_change_seen_by_a_read_is_kept_for_the_next_watch() {
        let store = EtcdStore::new(EtcdConfig {
            endpoints: vec!["http://127.0.0.1:1".into()],
            ca_cert: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CLUSTER_ID_HEADER, "aaaa".parse().unwrap());
        assert!(!store.cluster_changed(&headers, false));

        headers.insert(CLUSTER_ID_HEADER, "bbbb".parse().unwrap());
        assert!(!store.cluster_changed(&headers, false));
        assert!(!store.cluster_changed(&headers, false));
        assert!(store.cluster_changed(&headers, true));
        assert!(!store.cluster_changed(&headers, true));
    }

    #[tokio::test]
    async fn unreachable_store_is_a_transport_error() {
        let store = EtcdStore::new(EtcdConfig {
            endpoints: vec!["http://127.0.0.1:1".into(), "http://127.0.0.1:2".into()],
            ca_cert: None,
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();
        let err = store.get("/k", false).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }
}
