use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CredentialSource, SECRET_BYTES};
use crate::CoreError;

const USER_SECRET_FILE: &str = ".etcd-password";
const ADMIN_SECRET_FILE: &str = "etcd-password";

/// Group and other read/write bits.
const LOOSE_BITS: u32 = 0o066;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretKind {
    /// Per-user secret, generated on first use.
    User,
    /// Shared secret provisioned by the administrator.
    Admin,
}

/// Shared secret persisted on disk with owner-only permissions.
///
/// The secret is read (or generated) on first use and cached for the life
/// of the process.
#[derive(Debug)]
pub struct PasswordCredential {
    path: PathBuf,
    kind: SecretKind,
    may_generate: bool,
    cached: Mutex<Option<String>>,
}

impl PasswordCredential {
    /// Per-user secret stored under `state_dir`. When `may_generate` is
    /// false a missing file is an error instead of triggering generation.
    pub fn for_user(state_dir: impl AsRef<Path>, may_generate: bool) -> Self {
        Self {
            path: state_dir.as_ref().join(USER_SECRET_FILE),
            kind: SecretKind::User,
            may_generate,
            cached: Mutex::new(None),
        }
    }

    /// Administrative secret stored under `conf_dir`. Never generated.
    pub fn admin(conf_dir: impl AsRef<Path>) -> Self {
        Self {
            path: conf_dir.as_ref().join(ADMIN_SECRET_FILE),
            kind: SecretKind::Admin,
            may_generate: false,
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the persisted secret with a fresh one.
    pub async fn rotate(&self) -> Result<String, CoreError> {
        if self.kind == SecretKind::Admin {
            return Err(CoreError::Credential(
                "the administrative password cannot be rotated".into(),
            ));
        }
        let mut cached = self.cached.lock().await;

        let secret = random_secret()?;
        self.ensure_parent();
        let staging = staging_path(&self.path)?;
        write_secret(&staging, &secret)
            .and_then(|()| fs::rename(&staging, &self.path))
            .map_err(|e| {
                let _ = fs::remove_file(&staging);
                CoreError::Credential(format!("unable to rotate password: {e}"))
            })?;

        info!(path = %self.path.display(), "rotated keystore password");
        *cached = Some(secret.clone());
        Ok(secret)
    }

    fn unreadable(&self) -> CoreError {
        CoreError::Credential(format!(
            "unable to read password file {}",
            self.path.display()
        ))
    }

    fn load(&self) -> Result<String, CoreError> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e)
                if e.kind() == io::ErrorKind::NotFound
                    && self.kind == SecretKind::User
                    && self.may_generate =>
            {
                return self.generate();
            }
            Err(_) => return Err(self.unreadable()),
        };

        if meta.permissions().mode() & LOOSE_BITS != 0 {
            warn!(path = %self.path.display(), "loose permissions on password file");
        }
        let secret = fs::read_to_string(&self.path)
            .map_err(|_| self.unreadable())?
            .trim()
            .to_string();

        if self.kind == SecretKind::User && secret.len() != 2 * SECRET_BYTES {
            return Err(CoreError::Configuration(format!(
                "password file {} is invalid, please delete it and allocate a new virtual cluster",
                self.path.display()
            )));
        }
        Ok(secret)
    }

    fn generate(&self) -> Result<String, CoreError> {
        info!(path = %self.path.display(), "password is not set, generating a new one");
        self.ensure_parent();

        let secret = random_secret()?;
        let staging = staging_path(&self.path)?;
        // The link only appears once the secret is fully written, and fails
        // if another process published first.
        let published = write_secret(&staging, &secret)
            .and_then(|()| fs::hard_link(&staging, &self.path));
        if let Err(e) = fs::remove_file(&staging) {
            debug!(path = %staging.display(), error = %e, "cannot remove staging password file");
        }

        match published {
            Ok(()) => Ok(secret),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "password file created concurrently");
                self.load()
            }
            Err(e) => Err(CoreError::Credential(format!(
                "unable to generate password: {e}"
            ))),
        }
    }

    fn ensure_parent(&self) {
        if let Some(parent) = self.path.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            debug!(dir = %parent.display(), error = %e, "cannot create state directory");
        }
    }
}

#[async_trait]
impl CredentialSource for PasswordCredential {
    async fn credential(&self) -> Result<String, CoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(secret) = cached.as_ref() {
            return Ok(secret.clone());
        }
        let secret = self.load()?;
        *cached = Some(secret.clone());
        Ok(secret)
    }

    /// Re-read the file: another process may have rotated it.
    async fn renew(&self) -> Result<String, CoreError> {
        let mut cached = self.cached.lock().await;
        let secret = self.load()?;
        *cached = Some(secret.clone());
        Ok(secret)
    }
}

fn random_secret() -> Result<String, CoreError> {
    let mut raw = [0u8; SECRET_BYTES];
    getrandom::getrandom(&mut raw)
        .map_err(|e| CoreError::Credential(format!("unable to generate password: {e}")))?;
    Ok(hex::encode(raw))
}

/// Unique sibling of `path` to prepare a secret in before publishing it.
fn staging_path(path: &Path) -> Result<PathBuf, CoreError> {
    let mut nonce = [0u8; 4];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| CoreError::Credential(format!("unable to generate password: {e}")))?;
    Ok(path.with_extension(format!(
        "new.{}.{}",
        std::process::id(),
        hex::encode(nonce)
    )))
}

/// Create `path` (which must not exist) readable by its owner only.
fn write_secret(path: &Path, secret: &str) -> io::Result<()> {
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(secret.as_bytes())?;
    f.flush()
}
