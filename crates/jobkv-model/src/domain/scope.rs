use std::{fmt, str::FromStr};

use crate::ModelError;

/// Keystore namespace a key lives in.
///
/// Scopes decide both the physical path and who may write there:
/// `global` keys are cluster-wide and read-only for ordinary users, `cluster`
/// keys belong to one job, and the `/user` variants are writable by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    GlobalUser,
    Cluster,
    ClusterUser,
}

impl Scope {
    /// Returns `true` if resolving a key in this scope needs an active job.
    pub fn is_job_scoped(&self) -> bool {
        matches!(self, Scope::Cluster | Scope::ClusterUser)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::GlobalUser => "global/user",
            Scope::Cluster => "cluster",
            Scope::ClusterUser => "cluster/user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Scope::Global),
            "global/user" => Ok(Scope::GlobalUser),
            "cluster" => Ok(Scope::Cluster),
            "cluster/user" => Ok(Scope::ClusterUser),
            _ => Err(ModelError::UnknownScope(s.to_string())),
        }
    }
}
