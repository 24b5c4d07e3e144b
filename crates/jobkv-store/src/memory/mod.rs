//! In-process keystore with the same indexing, conditional-write and watch
//! semantics as the networked store.
//!
//! All clones of a [`MemoryStore`] share one keyspace. Each handle carries
//! its own session credentials; [`MemoryStore::session`] opens a fresh one,
//! which is how tests model several processes talking to a single store.

mod keys;
mod state;

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, MutexGuard, watch},
    time::Instant,
};
use tracing::trace;

use crate::{
    AUTH_EXPIRED_CODE, DeleteOptions, Fetched, KeyStore, RoleGrant, StoreError, StoreUser,
    WatchOptions, WriteOptions,
};
use keys::{ROOT, normalize};
use state::{State, touches};

/// Number of past mutations kept for watches that start behind the head.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

struct Shared {
    state: Mutex<State>,
    /// Carries the store index after every mutation.
    changes: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    session: Arc<StdRwLock<Option<(String, String)>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_state(State::new(DEFAULT_HISTORY_LIMIT, false))
    }

    /// Store keeping only the last `limit` mutations for watchers.
    pub fn with_history_limit(limit: usize) -> Self {
        Self::from_state(State::new(limit.max(1), false))
    }

    /// Store rejecting every request whose session credentials do not match
    /// an account registered with [`MemoryStore::set_password`].
    pub fn with_auth() -> Self {
        Self::from_state(State::new(DEFAULT_HISTORY_LIMIT, true))
    }

    fn from_state(state: State) -> Self {
        let (changes, _) = watch::channel(state.index);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changes,
            }),
            session: Arc::new(StdRwLock::new(None)),
        }
    }

    /// New handle on the same keyspace with no credentials set.
    pub fn session(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            session: Arc::new(StdRwLock::new(None)),
        }
    }

    /// Create an account or change its password, bypassing authorization.
    pub async fn set_password(&self, user: &str, password: &str) {
        let mut state = self.shared.state.lock().await;
        state
            .accounts
            .entry(user.to_string())
            .or_default()
            .password = password.to_string();
    }

    pub async fn current_index(&self) -> u64 {
        self.shared.state.lock().await.index
    }

    /// Roles attached to an account, bypassing authorization.
    pub async fn roles_of(&self, user: &str) -> Vec<String> {
        let state = self.shared.state.lock().await;
        state
            .accounts
            .get(user)
            .map(|a| a.roles.clone())
            .unwrap_or_default()
    }

    pub async fn role(&self, role: &str) -> Option<RoleGrant> {
        self.shared.state.lock().await.roles.get(role).cloned()
    }

    /// Lock the state after dropping expired entries.
    async fn lock_fresh(&self) -> MutexGuard<'_, State> {
        let mut state = self.shared.state.lock().await;
        if state.expire(Instant::now()) {
            self.shared.changes.send_replace(state.index);
        }
        state
    }

    fn authorize(&self, state: &State) -> Result<(), StoreError> {
        if !state.auth_enabled {
            return Ok(());
        }
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some((user, password))
                if state
                    .accounts
                    .get(user)
                    .is_some_and(|a| a.password == *password) =>
            {
                Ok(())
            }
            _ => Err(StoreError::Rejected {
                error_code: Some(AUTH_EXPIRED_CODE),
                status: Some(401),
                message: "the request requires user authentication".into(),
            }),
        }
    }

    fn notify(&self, state: &State) {
        self.shared.changes.send_replace(state.index);
    }
}

fn root_is_read_only() -> StoreError {
    StoreError::Rejected {
        error_code: Some(107),
        status: Some(403),
        message: "root is read only".into(),
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get(&self, key: &str, recursive: bool) -> Result<Fetched, StoreError> {
        let key = normalize(key);
        let state = self.lock_fresh().await;
        self.authorize(&state)?;

        let Some(entry) = state.entries.get(&key) else {
            return Err(StoreError::KeyNotFound {
                key,
                index: state.index,
            });
        };
        let node = state.render(&key, entry, true, recursive);
        Ok(Fetched {
            node,
            store_index: state.index,
        })
    }

    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<Fetched, StoreError> {
        let key = normalize(key);
        let mut state = self.lock_fresh().await;
        self.authorize(&state)?;
        if key == ROOT {
            return Err(root_is_read_only());
        }

        let node = state.write(&key, value, opts, Instant::now())?;
        trace!(key = %key, index = state.index, "memory store write");
        self.notify(&state);
        Ok(Fetched {
            node,
            store_index: state.index,
        })
    }

    async fn delete(&self, key: &str, opts: &DeleteOptions) -> Result<Fetched, StoreError> {
        let key = normalize(key);
        let mut state = self.lock_fresh().await;
        self.authorize(&state)?;
        if key == ROOT {
            return Err(root_is_read_only());
        }

        let node = state.remove(&key, opts)?;
        trace!(key = %key, index = state.index, "memory store delete");
        self.notify(&state);
        Ok(Fetched {
            node,
            store_index: state.index,
        })
    }

    async fn watch(&self, key: &str, opts: &WatchOptions) -> Result<Fetched, StoreError> {
        let key = normalize(key);
        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let mut wait_index = opts.wait_index;

        loop {
            let (mut changes, next_expiry) = {
                let state = self.lock_fresh().await;
                self.authorize(&state)?;

                let from = *wait_index.get_or_insert(state.index + 1);
                if from <= state.cleared_up_to {
                    return Err(StoreError::IndexCleared { index: state.index });
                }
                if let Some(event) = state
                    .history
                    .iter()
                    .find(|e| e.node.modified_index >= from && touches(e, &key, opts.recursive))
                {
                    return Ok(Fetched {
                        node: event.node.clone(),
                        store_index: state.index,
                    });
                }
                (self.shared.changes.subscribe(), state.next_expiry())
            };

            match [deadline, next_expiry].into_iter().flatten().min() {
                Some(wake_at) => {
                    let woke = tokio::time::timeout_at(wake_at, changes.changed()).await;
                    if woke.is_err() && deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(StoreError::WatchTimedOut { key });
                    }
                }
                None => {
                    let _ = changes.changed().await;
                }
            }
        }
    }

    fn set_credentials(&self, username: &str, password: &str) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        *session = Some((username.to_string(), password.to_string()));
    }

    async fn put_role(&self, grant: &RoleGrant) -> Result<(), StoreError> {
        let mut state = self.shared.state.lock().await;
        self.authorize(&state)?;
        state.roles.insert(grant.role.clone(), grant.clone());
        Ok(())
    }

    async fn get_user(&self, user: &str) -> Result<Option<StoreUser>, StoreError> {
        let state = self.shared.state.lock().await;
        self.authorize(&state)?;
        Ok(state.accounts.get(user).map(|a| StoreUser {
            user: user.to_string(),
            password: None,
            roles: a.roles.clone(),
        }))
    }

    async fn put_user(&self, user: &StoreUser) -> Result<(), StoreError> {
        let mut state = self.shared.state.lock().await;
        self.authorize(&state)?;

        if !state.accounts.contains_key(&user.user) && user.password.is_none() {
            return Err(StoreError::Rejected {
                error_code: None,
                status: Some(400),
                message: format!("password required to create user {}", user.user),
            });
        }
        let account = state.accounts.entry(user.user.clone()).or_default();
        if let Some(password) = &user.password {
            account.password = password.clone();
        }
        for role in &user.roles {
            if !account.roles.contains(role) {
                account.roles.push(role.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn write_then_read_tracks_indices() {
        let store = MemoryStore::new();

        let first = store
            .set("/pcocc/global/k", Some("a"), &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(first.node.modified_index, 1);
        assert_eq!(first.node.created_index, 1);

        let second = store
            .set("/pcocc/global/k", Some("b"), &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(second.node.modified_index, 2);
        assert_eq!(second.node.created_index, 1);

        let read = store.get("/pcocc/global/k", false).await.unwrap();
        assert_eq!(read.node.value.as_deref(), Some("b"));
        assert_eq!(read.store_index, 2);

        let parent = store.get("/pcocc/global", false).await.unwrap();
        assert!(parent.node.dir);
        assert_eq!(parent.node.children().len(), 1);
    }

    #[tokio::test]
    async fn missing_key_reports_store_index() {
        let store = MemoryStore::new();
        store
            .set("/a", Some("1"), &WriteOptions::default())
            .await
            .unwrap();

        let err = store.get("/b", false).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::KeyNotFound {
                key: "/b".into(),
                index: 1
            }
        );
    }

    #[tokio::test]
    async fn conditional_writes() {
        let store = MemoryStore::new();
        store
            .set("/k", Some("a"), &WriteOptions::if_absent())
            .await
            .unwrap();

        let dup = store
            .set("/k", Some("b"), &WriteOptions::if_absent())
            .await
            .unwrap_err();
        assert!(matches!(dup, StoreError::AlreadyExists { .. }));

        let stale = store
            .set("/k", Some("b"), &WriteOptions::if_index(42))
            .await
            .unwrap_err();
        assert!(matches!(stale, StoreError::CompareFailed { .. }));

        let missing = store
            .set("/other", Some("b"), &WriteOptions::if_index(1))
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::KeyNotFound { .. }));

        store
            .set("/k", Some("b"), &WriteOptions::if_index(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn directories_reject_values_and_listing_is_sorted() {
        let store = MemoryStore::new();
        store
            .set("/d/", None, &WriteOptions::directory())
            .await
            .unwrap();
        for name in ["c", "a", "b"] {
            store
                .set(&format!("/d/{name}"), Some(name), &WriteOptions::default())
                .await
                .unwrap();
        }

        let err = store
            .set("/d", Some("x"), &WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotAFile { .. }));

        let err = store
            .set("/d/a/deeper", Some("x"), &WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotADirectory { .. }));

        let listing = store.get("/d", false).await.unwrap();
        let names: Vec<_> = listing.node.children().iter().map(|n| n.name()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn recursive_listing_nests_children() {
        let store = MemoryStore::new();
        store
            .set("/r/x/y", Some("1"), &WriteOptions::default())
            .await
            .unwrap();

        let flat = store.get("/r", false).await.unwrap();
        assert!(flat.node.children()[0].dir);
        assert!(flat.node.children()[0].nodes.is_empty());

        let deep = store.get("/r", true).await.unwrap();
        assert_eq!(deep.node.children()[0].children()[0].key, "/r/x/y");
    }

    #[tokio::test]
    async fn delete_rules() {
        let store = MemoryStore::new();
        store
            .set("/d/k", Some("1"), &WriteOptions::default())
            .await
            .unwrap();

        let err = store
            .delete("/d", &DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotAFile { .. }));

        let err = store
            .delete(
                "/d",
                &DeleteOptions {
                    dir: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DirectoryNotEmpty { .. }));

        let err = store
            .delete("/d/k", &DeleteOptions::tree())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotADirectory { .. }));

        store.delete("/d", &DeleteOptions::tree()).await.unwrap();
        assert!(store.get("/d/k", false).await.is_err());
    }

    #[tokio::test]
    async fn compare_and_delete() {
        let store = MemoryStore::new();
        let written = store
            .set("/k", Some("1"), &WriteOptions::default())
            .await
            .unwrap();

        let err = store
            .delete("/k", &DeleteOptions::if_index(written.node.modified_index + 5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CompareFailed { .. }));

        store
            .delete("/k", &DeleteOptions::if_index(written.node.modified_index))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn watch_sees_past_and_future_events() {
        let store = MemoryStore::new();
        store
            .set("/w", Some("1"), &WriteOptions::default())
            .await
            .unwrap();

        let past = store
            .watch(
                "/w",
                &WatchOptions {
                    wait_index: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(past.node.value.as_deref(), Some("1"));

        let writer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .set("/w", Some("2"), &WriteOptions::default())
                .await
                .unwrap();
        });

        let next = store
            .watch(
                "/w",
                &WatchOptions {
                    wait_index: Some(2),
                    timeout: Some(Duration::from_secs(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(next.node.value.as_deref(), Some("2"));
        assert_eq!(next.node.modified_index, 2);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn recursive_watch_reports_child_events() {
        let store = MemoryStore::new();
        let writer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .set("/dir/child", Some("x"), &WriteOptions::default())
                .await
                .unwrap();
        });

        let event = store
            .watch(
                "/dir",
                &WatchOptions {
                    recursive: true,
                    timeout: Some(Duration::from_secs(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(event.node.key, "/dir/child");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn watch_times_out() {
        let store = MemoryStore::new();
        let err = store
            .watch(
                "/quiet",
                &WatchOptions {
                    timeout: Some(Duration::from_millis(30)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::WatchTimedOut {
                key: "/quiet".into()
            }
        );
    }

    #[tokio::test]
    async fn old_indices_are_cleared() {
        let store = MemoryStore::with_history_limit(2);
        for i in 0..5 {
            store
                .set("/k", Some(&i.to_string()), &WriteOptions::default())
                .await
                .unwrap();
        }

        let err = store
            .watch(
                "/k",
                &WatchOptions {
                    wait_index: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::IndexCleared { index: 5 });
    }

    #[tokio::test]
    async fn ttl_entries_expire_and_wake_watchers() {
        let store = MemoryStore::new();
        let written = store
            .set(
                "/tmp",
                None,
                &WriteOptions::directory().with_ttl(1),
            )
            .await
            .unwrap();
        assert_eq!(written.node.ttl, Some(1));

        let event = store
            .watch(
                "/tmp",
                &WatchOptions {
                    timeout: Some(Duration::from_secs(5)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(event.node.key, "/tmp");
        assert!(store.get("/tmp", false).await.is_err());
    }

    #[tokio::test]
    async fn refresh_directory_ttl() {
        let store = MemoryStore::new();
        store
            .set("/c", None, &WriteOptions::directory())
            .await
            .unwrap();

        let err = store
            .set("/c", None, &WriteOptions::directory())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotAFile { .. }));

        let refreshed = store
            .set(
                "/c",
                None,
                &WriteOptions {
                    dir: true,
                    prev_exist: Some(true),
                    ttl: Some(600),
                    prev_index: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(refreshed.node.ttl, Some(600));
    }

    #[tokio::test]
    async fn authentication_is_enforced_per_session() {
        let store = MemoryStore::with_auth();
        store.set_password("alice", "s3cret").await;

        let anonymous = store.session();
        let err = anonymous.get("/x", false).await.unwrap_err();
        assert!(err.is_auth_expired());

        let alice = store.session();
        alice.set_credentials("alice", "s3cret");
        assert!(matches!(
            alice.get("/x", false).await,
            Err(StoreError::KeyNotFound { .. })
        ));

        store.set_password("alice", "rotated").await;
        assert!(alice.get("/x", false).await.unwrap_err().is_auth_expired());
    }

    #[tokio::test]
    async fn user_roles_accumulate() {
        let store = MemoryStore::new();
        let err = store
            .put_user(&StoreUser {
                user: "bob".into(),
                password: None,
                roles: vec!["r1".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));

        store
            .put_user(&StoreUser {
                user: "bob".into(),
                password: Some("pw".into()),
                roles: vec!["r1".into()],
            })
            .await
            .unwrap();
        store
            .put_user(&StoreUser {
                user: "bob".into(),
                password: None,
                roles: vec!["r1".into(), "r2".into()],
            })
            .await
            .unwrap();

        let user = store.get_user("bob").await.unwrap().unwrap();
        assert_eq!(user.roles, ["r1", "r2"]);
        assert!(store.get_user("nobody").await.unwrap().is_none());
    }
}
