use async_trait::async_trait;

use crate::{
    DeleteOptions, Fetched, RoleGrant, StoreError, StoreUser, WatchOptions, WriteOptions,
};

/// Operations the coordination layer issues against the keystore.
///
/// Keys are absolute slash-separated paths. Every mutation bumps the store's
/// global index; conditional writes compare against the per-entry
/// `modified_index`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Read a key or directory. Directory reads list direct children, or the
    /// whole subtree when `recursive` is set.
    async fn get(&self, key: &str, recursive: bool) -> Result<Fetched, StoreError>;

    /// Write a key, or create/refresh a directory when `opts.dir` is set.
    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        opts: &WriteOptions,
    ) -> Result<Fetched, StoreError>;

    async fn delete(&self, key: &str, opts: &DeleteOptions) -> Result<Fetched, StoreError>;

    /// Block until a mutation at or after `opts.wait_index` touches the key.
    async fn watch(&self, key: &str, opts: &WatchOptions) -> Result<Fetched, StoreError>;

    /// Credentials presented on every subsequent request.
    fn set_credentials(&self, username: &str, password: &str);

    async fn put_role(&self, grant: &RoleGrant) -> Result<(), StoreError>;

    /// Fetch an account, `None` if it does not exist.
    async fn get_user(&self, user: &str) -> Result<Option<StoreUser>, StoreError>;

    /// Create or update an account. Roles are added to the existing ones.
    async fn put_user(&self, user: &StoreUser) -> Result<(), StoreError>;
}
