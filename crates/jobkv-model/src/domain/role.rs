use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Kind of process taking part in a job, with respect to batch management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessRole {
    /// Privileged process preparing a node for the job.
    Setup,
    /// Process hosting one virtual machine of the job.
    Hypervisor,
    /// Process launching the hypervisors of a job.
    Launcher,
    /// User tool acting on a job.
    User,
    /// Any other process, not bound to a job.
    Other,
}

impl ProcessRole {
    /// Returns `true` for roles that expand the task distribution themselves
    /// instead of fetching the published rank map.
    pub fn builds_rank_map(&self) -> bool {
        matches!(
            self,
            ProcessRole::Setup | ProcessRole::Hypervisor | ProcessRole::Launcher
        )
    }

    /// Returns `true` if the role cannot work without knowing its own node rank.
    pub fn requires_placement(&self) -> bool {
        matches!(self, ProcessRole::Setup | ProcessRole::Hypervisor)
    }

    /// Returns `true` if processes of this role never touch job state.
    pub fn is_detached(&self) -> bool {
        matches!(self, ProcessRole::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Setup => "setup",
            ProcessRole::Hypervisor => "hypervisor",
            ProcessRole::Launcher => "launcher",
            ProcessRole::User => "user",
            ProcessRole::Other => "other",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessRole {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "setup" => Ok(ProcessRole::Setup),
            "hypervisor" => Ok(ProcessRole::Hypervisor),
            "launcher" => Ok(ProcessRole::Launcher),
            "user" => Ok(ProcessRole::User),
            "other" => Ok(ProcessRole::Other),
            _ => Err(ModelError::InvalidRole(s.to_string())),
        }
    }
}
