use std::time::Duration;

use jobkv_model::StoreNode;
use serde::{Deserialize, Serialize};

/// Conditions and flags of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write only if the entry was last modified at this index.
    pub prev_index: Option<u64>,
    /// `Some(false)`: entry must not exist. `Some(true)`: entry must exist.
    pub prev_exist: Option<bool>,
    /// Entry lifetime in seconds.
    pub ttl: Option<u64>,
    /// Create (or refresh) a directory instead of a plain key.
    pub dir: bool,
}

impl WriteOptions {
    pub fn if_index(index: u64) -> Self {
        Self {
            prev_index: Some(index),
            ..Default::default()
        }
    }

    pub fn if_absent() -> Self {
        Self {
            prev_exist: Some(false),
            ..Default::default()
        }
    }

    pub fn directory() -> Self {
        Self {
            dir: true,
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub dir: bool,
    /// Delete only if the entry was last modified at this index.
    pub prev_index: Option<u64>,
}

impl DeleteOptions {
    pub fn if_index(index: u64) -> Self {
        Self {
            prev_index: Some(index),
            ..Default::default()
        }
    }

    pub fn tree() -> Self {
        Self {
            recursive: true,
            dir: true,
            prev_index: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Report changes to any descendant of the key.
    pub recursive: bool,
    /// First index of interest. Defaults to the next mutation.
    pub wait_index: Option<u64>,
    /// Give up after this long with [`StoreError::WatchTimedOut`](crate::StoreError).
    pub timeout: Option<Duration>,
}

/// Entry returned by a store call together with the store's global index at
/// the time of the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub node: StoreNode,
    pub store_index: u64,
}

/// Permissions attached to a store role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    /// Key patterns readable by holders of the role.
    pub read: Vec<String>,
    /// Key patterns writable by holders of the role.
    pub write: Vec<String>,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn read(mut self, pattern: impl Into<String>) -> Self {
        self.read.push(pattern.into());
        self
    }

    pub fn read_write(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.read.push(pattern.clone());
        self.write.push(pattern);
        self
    }
}

/// Store account record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreUser {
    pub user: String,
    /// Only set when the password must change.
    pub password: Option<String>,
    pub roles: Vec<String>,
}
