use std::{fmt, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::ModelError;

const DEFAULT_ROOT: &str = "pcocc";
const DEFAULT_CONF_DIR: &str = "/etc/pcocc";

/// Batch configuration document.
///
/// ```json
/// {
///   "type": "slurm",
///   "settings": {
///     "etcd-servers": ["kv1", "kv2"],
///     "etcd-client-port": 2379,
///     "etcd-protocol": "https",
///     "etcd-ca-cert": "/etc/pcocc/ca.pem",
///     "etcd-auth-type": "password"
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    #[serde(rename = "type")]
    pub kind: SchedulerKind,
    pub settings: StoreSettings,
}

/// Batch scheduler driving the jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Slurm,
}

/// Keystore connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StoreSettings {
    /// Keystore hosts, tried in order.
    pub etcd_servers: Vec<String>,
    /// Client port shared by every host.
    pub etcd_client_port: u16,
    pub etcd_protocol: Protocol,
    /// CA bundle used to verify the keystore certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etcd_ca_cert: Option<PathBuf>,
    pub etcd_auth_type: AuthKind,
    /// First path component of every key.
    #[serde(default = "default_root")]
    pub root: String,
    /// Administrative configuration directory (holds the shared secret).
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,
    /// Per-user state directory. Defaults to `~/.pcocc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

/// Transport used to reach the keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// How the keystore credential is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// Locally generated secret persisted with owner-only permissions.
    Password,
    /// Opaque token minted by the local munge daemon on every call.
    Munge,
}

fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}

fn default_conf_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CONF_DIR)
}

impl BatchConfig {
    /// Parse and validate a configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ModelError> {
        let cfg: BatchConfig =
            serde_json::from_str(raw).map_err(|e| ModelError::InvalidConfig(e.to_string()))?;
        cfg.settings.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ModelError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

impl StoreSettings {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.etcd_servers.is_empty() || self.etcd_servers.iter().any(|s| s.trim().is_empty())
        {
            return Err(ModelError::InvalidConfig(
                "etcd-servers must list at least one host".into(),
            ));
        }
        if self.etcd_client_port == 0 {
            return Err(ModelError::InvalidConfig(
                "etcd-client-port must be non-zero".into(),
            ));
        }
        if self.etcd_ca_cert.is_some() && self.etcd_protocol == Protocol::Http {
            return Err(ModelError::InvalidConfig(
                "etcd-ca-cert requires the https protocol".into(),
            ));
        }
        if self.root.is_empty() || self.root.contains('/') {
            return Err(ModelError::InvalidConfig(format!(
                "root must be a single path component, got {:?}",
                self.root
            )));
        }
        Ok(())
    }

    /// Base URLs of every configured keystore host.
    pub fn endpoints(&self) -> Vec<String> {
        self.etcd_servers
            .iter()
            .map(|host| {
                format!(
                    "{}://{}:{}",
                    self.etcd_protocol.scheme(),
                    host.trim(),
                    self.etcd_client_port
                )
            })
            .collect()
    }
}
