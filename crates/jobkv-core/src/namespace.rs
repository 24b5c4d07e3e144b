use jobkv_model::{JobId, Scope};

use crate::CoreError;

/// Maps `(scope, key)` pairs to store paths.
///
/// ```text
/// /<root>/global/<key>
/// /<root>/global/users/<user>/<key>
/// /<root>/cluster/<batch_id>/<key>
/// /<root>/cluster/users/<user>/<batch_id>/<key>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    root: String,
    user: String,
    batch_id: JobId,
}

impl KeyNamespace {
    pub fn new(root: impl Into<String>, user: impl Into<String>, batch_id: JobId) -> Self {
        Self {
            root: root.into(),
            user: user.into(),
            batch_id,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn batch_id(&self) -> JobId {
        self.batch_id
    }

    /// Path of `key` in `scope`. An empty key names the scope directory.
    pub fn resolve(&self, scope: Scope, key: &str) -> Result<String, CoreError> {
        if scope.is_job_scoped() && self.batch_id == 0 {
            return Err(CoreError::NoJob);
        }
        let base = match scope {
            Scope::Global => format!("/{}/global", self.root),
            Scope::GlobalUser => format!("/{}/global/users/{}", self.root, self.user),
            Scope::Cluster => format!("/{}/cluster/{}", self.root, self.batch_id),
            Scope::ClusterUser => format!(
                "/{}/cluster/users/{}/{}",
                self.root, self.user, self.batch_id
            ),
        };
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            Ok(base)
        } else {
            Ok(format!("{base}/{key}"))
        }
    }

    /// Same as [`KeyNamespace::resolve`] with the scope given by name.
    pub fn resolve_named(&self, scope: &str, key: &str) -> Result<String, CoreError> {
        let scope = scope
            .parse::<Scope>()
            .map_err(|e| CoreError::Configuration(e.to_string()))?;
        self.resolve(scope, key)
    }

    /// Pattern matching every key of the jobs' `cluster` scopes.
    pub fn cluster_pattern(&self) -> String {
        format!("/{}/cluster/*", self.root)
    }

    /// Pattern matching the user's per-job keys.
    pub fn cluster_user_pattern(&self) -> String {
        format!("/{}/cluster/users/{}/*", self.root, self.user)
    }

    /// Pattern matching the user's global keys.
    pub fn global_user_pattern(&self) -> String {
        format!("/{}/global/users/{}/*", self.root, self.user)
    }
}
