use serde::{Deserialize, Serialize};

/// One entry of the keystore, as returned by reads and watches.
///
/// Directories carry their children in `nodes` (only populated on directory
/// reads); plain keys carry a `value`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreNode {
    /// Full path of the entry.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dir: bool,
    /// Store index of the last mutation of this entry.
    #[serde(default)]
    pub modified_index: u64,
    /// Store index of the entry's creation.
    #[serde(default)]
    pub created_index: u64,
    /// Remaining time to live in seconds, if the entry expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<StoreNode>,
}

impl StoreNode {
    /// Direct children of a directory entry.
    pub fn children(&self) -> &[StoreNode] {
        &self.nodes
    }

    /// Last path component.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or_default()
    }
}
