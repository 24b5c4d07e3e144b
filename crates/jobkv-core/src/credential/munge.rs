use std::path::PathBuf;

use async_trait::async_trait;
use jobkv_exec::{ProcConfig, capture};
use tracing::debug;

use super::CredentialSource;
use crate::CoreError;

const MUNGE_BIN: &str = "/usr/bin/munge";

/// Token minted by the local munge daemon, fetched again on every call.
#[derive(Debug, Clone)]
pub struct MungeCredential {
    program: PathBuf,
}

impl Default for MungeCredential {
    fn default() -> Self {
        Self {
            program: PathBuf::from(MUNGE_BIN),
        }
    }
}

impl MungeCredential {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for MungeCredential {
    async fn credential(&self) -> Result<String, CoreError> {
        let cfg = ProcConfig::new(self.program.to_string_lossy()).arg("-n");
        let out = capture(&cfg)
            .await
            .map_err(|e| CoreError::Credential(format!("munge token unavailable: {e}")))?;
        debug!(bytes = out.stdout.len(), "minted munge token");
        Ok(out.stdout)
    }
}
