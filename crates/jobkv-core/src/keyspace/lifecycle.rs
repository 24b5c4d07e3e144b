use jobkv_model::Scope;
use jobkv_store::{RoleGrant, StoreUser, WriteOptions};
use tracing::{debug, info, warn};

use super::Keyspace;
use crate::{CoreError, is_password_credential};

/// Seconds a job's keys survive after teardown was signalled.
pub const CLUSTER_TTL: u64 = 600;

impl Keyspace {
    /// Grant the job's user access to its keys and create its per-job
    /// directory.
    ///
    /// The user gets a `<user>-pcocc` role with read access to every job's
    /// `cluster` keys and read-write access to its own `cluster/user` and
    /// `global/user` keys. `requested_password`, when it looks like a
    /// generated password, becomes the user's store password.
    pub async fn init_cluster_keys(
        &self,
        requested_password: Option<&str>,
    ) -> Result<(), CoreError> {
        let user = self.ns.user().to_string();
        let role = format!("{user}-pcocc");
        let store = self.conn.store();

        info!(role = %role, "initializing keystore role");
        let grant = RoleGrant::new(role.as_str())
            .read(self.ns.cluster_pattern())
            .read_write(self.ns.cluster_user_pattern())
            .read_write(self.ns.global_user_pattern());
        self.conn.call(|| store.put_role(&grant)).await?;

        info!(user = %user, "initializing keystore user");
        let mut account = self
            .conn
            .call(|| store.get_user(&user))
            .await?
            .unwrap_or_else(|| StoreUser {
                user: user.clone(),
                ..Default::default()
            });
        if !account.roles.contains(&role) {
            account.roles.push(role.clone());
        }
        if let Some(password) = requested_password.filter(|p| is_password_credential(p)) {
            info!(user = %user, "updating keystore password");
            account.password = Some(password.to_string());
        }
        self.conn.call(|| store.put_user(&account)).await?;

        self.make_dir(Scope::ClusterUser, "").await
    }

    /// Arm the self-destruct TTL on the job's directories.
    ///
    /// Store failures are only logged: the keys then expire with the store's
    /// own retention or are cleaned by the next allocation.
    pub async fn cleanup_cluster_keys(&self) -> Result<(), CoreError> {
        let paths = [
            self.path(Scope::Cluster, "")?,
            self.path(Scope::ClusterUser, "")?,
        ];
        let opts = WriteOptions {
            prev_exist: Some(true),
            ..WriteOptions::directory().with_ttl(CLUSTER_TTL)
        };

        debug!("setting self-destruct on cluster keystore");
        for path in &paths {
            if let Err(e) = self.write_path(path, None, &opts).await {
                warn!(key = %path, error = %e, "failed to cleanup cluster keystore");
            }
        }
        Ok(())
    }
}
