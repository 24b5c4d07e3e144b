use jobkv_model::Scope;
use jobkv_store::{DeleteOptions, WriteOptions};
use tracing::debug;

use super::Keyspace;
use crate::CoreError;

/// Outcome of one read-transform-write cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// Another writer got in between the read and the write.
    Retry,
}

impl<T> Attempt<T> {
    /// Turn store race signals into [`Attempt::Retry`].
    fn settle(write: Result<(), CoreError>, result: T) -> Result<Self, CoreError> {
        match write {
            Ok(()) => Ok(Attempt::Done(result)),
            Err(CoreError::Store(e)) if e.is_race() => Ok(Attempt::Retry),
            Err(e) => Err(e),
        }
    }
}

impl Keyspace {
    /// Atomically replace the value of a key.
    ///
    /// `transform` receives the current value (`None` if the key is absent)
    /// and returns the new value together with a result handed back to the
    /// caller. A `None` new value leaves an absent key untouched and deletes
    /// an existing one. The whole cycle restarts whenever another writer
    /// raced with it, so `transform` may run several times.
    pub async fn atomic_update<R, F>(
        &self,
        scope: Scope,
        key: &str,
        mut transform: F,
    ) -> Result<R, CoreError>
    where
        F: FnMut(Option<&str>) -> (Option<String>, R),
    {
        let path = self.path(scope, key)?;
        let mut attempt: u32 = 1;
        loop {
            match self.try_update(&path, &mut transform).await? {
                Attempt::Done(result) => return Ok(result),
                Attempt::Retry => {
                    debug!(key = %path, attempt, "retrying atomic update");
                    attempt += 1;
                }
            }
        }
    }

    async fn try_update<R, F>(&self, path: &str, transform: &mut F) -> Result<Attempt<R>, CoreError>
    where
        F: FnMut(Option<&str>) -> (Option<String>, R),
    {
        let (current, index) = self.read_path_index(path, true).await?;
        let (next, result) = transform(current.as_deref());
        debug!(key = %path, ?current, ?next, "trying atomic update");

        let write = match (&current, next.as_deref()) {
            (None, None) => return Ok(Attempt::Done(result)),
            (None, Some(value)) => self
                .write_path(path, Some(value), &WriteOptions::if_absent())
                .await
                .map(drop),
            (Some(_), Some(value)) => self
                .write_path(path, Some(value), &WriteOptions::if_index(index))
                .await
                .map(drop),
            (Some(_), None) => self
                .delete_path(path, &DeleteOptions::if_index(index))
                .await,
        };
        Attempt::settle(write, result)
    }
}

#[cfg(test)]
mod tests {
    use jobkv_store::MemoryStore;

    use super::super::testing::keyspace;
    use super::*;

    #[tokio::test]
    async fn creates_missing_key() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 5).await;

        let seen = ks
            .atomic_update(Scope::Cluster, "counter", |cur| {
                (Some("1".to_string()), cur.map(str::to_string))
            })
            .await
            .unwrap();
        assert_eq!(seen, None);
        assert_eq!(
            ks.read_key_index(Scope::Cluster, "counter", true)
                .await
                .unwrap()
                .0
                .as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn none_on_missing_key_writes_nothing() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 5).await;
        let before = store.current_index().await;

        let out = ks
            .atomic_update(Scope::Cluster, "absent", |_| (None, 42))
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(store.current_index().await, before);
    }

    #[tokio::test]
    async fn none_on_existing_key_deletes_it() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 5).await;
        ks.write_key(Scope::Cluster, "k", "v").await.unwrap();

        let old = ks
            .atomic_update(Scope::Cluster, "k", |cur| (None, cur.map(str::to_string)))
            .await
            .unwrap();
        assert_eq!(old.as_deref(), Some("v"));
        assert_eq!(
            ks.read_key_index(Scope::Cluster, "k", true).await.unwrap().0,
            None
        );
    }

    #[tokio::test]
    async fn retries_after_interleaved_write() {
        let store = MemoryStore::new();
        let ks = keyspace(&store, 5).await;
        ks.write_key(Scope::Cluster, "k", "0").await.unwrap();

        let intruder = keyspace(&store, 5).await;
        let mut calls = 0;
        let result = ks
            .atomic_update(Scope::Cluster, "k", |cur| {
                calls += 1;
                if calls == 1 {
                    // Simulate a concurrent writer between read and write.
                    let intruder = intruder.clone();
                    std::thread::spawn(move || {
                        let rt = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                            .unwrap();
                        rt.block_on(intruder.write_key(Scope::Cluster, "k", "10"))
                            .unwrap();
                    })
                    .join()
                    .unwrap();
                }
                let n: u32 = cur.unwrap().parse().unwrap();
                (Some((n + 1).to_string()), n)
            })
            .await
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(result, 10);
        assert_eq!(
            ks.read_key_index(Scope::Cluster, "k", true)
                .await
                .unwrap()
                .0
                .as_deref(),
            Some("11")
        );
    }
}
