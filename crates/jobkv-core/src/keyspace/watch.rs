use std::time::Duration;

use jobkv_model::{Scope, StoreNode};
use jobkv_store::{StoreError, WatchOptions};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Keyspace;
use crate::CoreError;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Per-attempt wait of [`Keyspace::wait_for_child_count`] (default: 30 seconds).
    pub child_count_timeout: Duration,
    /// Pause before re-arming a watch after the store became unreachable
    /// (default: 1 second).
    pub reconnect_pause: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            child_count_timeout: Duration::from_secs(30),
            reconnect_pause: Duration::from_secs(1),
        }
    }
}

impl Keyspace {
    /// Wait for the first change of a key (or anything below it) after
    /// `since_index`.
    ///
    /// Returns the new value (`None` for deletions and directories) and the
    /// index of the change. When the store no longer retains `since_index`
    /// or its cluster identity changed, returns `None` with the store's
    /// current index so the caller can take a new baseline. Fails with
    /// [`CoreError::KeyTimeout`] once `timeout` elapsed.
    pub async fn wait_for_key(
        &self,
        scope: Scope,
        key: &str,
        since_index: u64,
        timeout: Option<Duration>,
    ) -> Result<(Option<String>, u64), CoreError> {
        let path = self.path(scope, key)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        self.wait_path(&path, since_index, deadline).await
    }

    async fn wait_path(
        &self,
        path: &str,
        since_index: u64,
        deadline: Option<Instant>,
    ) -> Result<(Option<String>, u64), CoreError> {
        let store = self.conn.store();
        loop {
            let remaining = match deadline {
                Some(at) => {
                    let left = at.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        info!(key = %path, "timeout while waiting for key");
                        return Err(CoreError::KeyTimeout { key: path.into() });
                    }
                    Some(left)
                }
                None => None,
            };
            let opts = WatchOptions {
                recursive: true,
                wait_index: Some(since_index + 1),
                timeout: remaining,
            };

            match self.conn.call(|| store.watch(path, &opts)).await {
                Ok(fetched) => return Ok((fetched.node.value, fetched.node.modified_index)),
                Err(CoreError::Store(StoreError::WatchTimedOut { .. })) => {
                    info!(key = %path, "timeout while waiting for key");
                    return Err(CoreError::KeyTimeout { key: path.into() });
                }
                Err(CoreError::Store(StoreError::Transport(e))) => {
                    warn!(key = %path, error = %e, "keystore unreachable, re-arming watch");
                    tokio::time::sleep(self.watch.reconnect_pause).await;
                }
                Err(e) => {
                    return match e.as_store().and_then(StoreError::rebaseline_index) {
                        Some(index) => {
                            debug!(key = %path, index, "watch baseline lost");
                            Ok((None, index))
                        }
                        None => Err(e),
                    };
                }
            }
        }
    }

    /// Wait until a directory has exactly `count` children and return it.
    ///
    /// Returns `None` only for `count == 0` with the directory absent.
    pub async fn wait_for_child_count(
        &self,
        scope: Scope,
        key: &str,
        count: usize,
    ) -> Result<Option<StoreNode>, CoreError> {
        loop {
            let (dir, index) = self.read_dir_index(scope, key).await?;
            let present = dir.as_ref().map_or(0, |d| d.children().len());
            if present == count {
                return Ok(dir);
            }
            debug!(scope = %scope, key, present, count, "waiting for directory entries");

            match self
                .wait_for_key(scope, key, index, Some(self.watch.child_count_timeout))
                .await
            {
                Ok(_) | Err(CoreError::KeyTimeout { .. }) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Read a key, `None` if absent.
    ///
    /// With `blocking`, an absent key is waited for until it gets a value or
    /// `timeout` elapses.
    pub async fn read_key(
        &self,
        scope: Scope,
        key: &str,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, CoreError> {
        let path = self.path(scope, key)?;
        let (mut value, mut index) = self.read_path_index(&path, false).await?;
        if value.is_some() || !blocking {
            return Ok(value);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        while value.is_none() {
            let (changed, at) = self.wait_path(&path, index, deadline).await?;
            (value, index) = match changed {
                Some(v) => (Some(v), at),
                // Deleted, or the watch lost its baseline: what was written
                // meanwhile is only visible through a fresh read.
                None => self.read_path_index(&path, false).await?,
            };
        }
        Ok(value)
    }
}
