use std::{path::PathBuf, time::Duration};

use jobkv_model::{JobId, ProcessRole};

use crate::{ConnectionConfig, WatchConfig};

/// How a process asks to be attached to a job.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub role: ProcessRole,
    /// Explicit job id, takes precedence over everything else.
    pub batch_id: Option<JobId>,
    /// Explicit job name, looked up among the user's jobs.
    pub batch_name: Option<String>,
    /// Name tried when neither an explicit job nor a job environment is
    /// available. A failed lookup leaves the process outside any job.
    pub default_batch_name: Option<String>,
    /// User whose jobs are considered, for user tools acting on behalf of
    /// someone else.
    pub batch_user: Option<String>,
    /// Host name used to locate the process in the node set. Defaults to
    /// the short host name of the machine.
    pub hostname: Option<String>,
    /// Node-local scratch base, `/tmp` by default.
    pub tmp_dir: Option<PathBuf>,
    /// Deadline for fetching the published rank map. `None` waits forever.
    pub rank_map_timeout: Option<Duration>,
    pub connection: ConnectionConfig,
    pub watch: WatchConfig,
}

impl ContextOptions {
    pub fn new(role: ProcessRole) -> Self {
        Self {
            role,
            batch_id: None,
            batch_name: None,
            default_batch_name: None,
            batch_user: None,
            hostname: None,
            tmp_dir: None,
            rank_map_timeout: None,
            connection: ConnectionConfig::default(),
            watch: WatchConfig::default(),
        }
    }

    pub fn with_batch_id(mut self, id: JobId) -> Self {
        self.batch_id = Some(id);
        self
    }

    pub fn with_batch_name(mut self, name: impl Into<String>) -> Self {
        self.batch_name = Some(name.into());
        self
    }

    pub fn with_default_batch_name(mut self, name: impl Into<String>) -> Self {
        self.default_batch_name = Some(name.into());
        self
    }

    pub fn with_batch_user(mut self, user: impl Into<String>) -> Self {
        self.batch_user = Some(user.into());
        self
    }

    pub fn with_hostname(mut self, host: impl Into<String>) -> Self {
        self.hostname = Some(host.into());
        self
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    pub fn with_rank_map_timeout(mut self, timeout: Duration) -> Self {
        self.rank_map_timeout = Some(timeout);
        self
    }

    pub fn with_watch_config(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }
}
