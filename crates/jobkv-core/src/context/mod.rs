//! Per-process view of the job.
//!
//! [`JobContext::resolve`] works out which job the process belongs to and
//! where it sits in it, then builds or fetches the job's rank map depending
//! on the process role. The keystore connection is opened on first use and
//! shared by everything the context hands out afterwards.

mod options;
pub use options::ContextOptions;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use jobkv_model::{
    AuthKind, JobId, JobIdentity, ProcessRole, RankMap, StoreSettings, TaskRank,
};
use jobkv_store::EtcdConfig;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    Connector, CoreError, CredentialSource, KeyNamespace, Keyspace, MungeCredential,
    PasswordCredential, Placement, ScratchDir, ScratchLayout, Scheduler, WatchConfig, system,
};

const STATE_DIR_NAME: &str = ".pcocc";

pub struct JobContext {
    identity: JobIdentity,
    settings: StoreSettings,
    scheduler: Arc<dyn Scheduler>,
    connector: Connector,
    keyspace: OnceCell<Keyspace>,
    watch: WatchConfig,
    state_dir: PathBuf,
    layout: Option<ScratchLayout>,
    placement: Option<Placement>,
    scratch: Vec<ScratchDir>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("identity", &self.identity)
            .field("placement", &self.placement)
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}

/// Credential matching the configured authentication and the caller.
///
/// Privileged processes use the administrative secret. Hypervisors only read
/// the user's secret and never create it.
pub fn credential_source(
    settings: &StoreSettings,
    role: ProcessRole,
    state_dir: &Path,
) -> Arc<dyn CredentialSource> {
    match settings.etcd_auth_type {
        AuthKind::Munge => Arc::new(MungeCredential::default()),
        AuthKind::Password if system::is_privileged() => {
            Arc::new(PasswordCredential::admin(&settings.conf_dir))
        }
        AuthKind::Password => Arc::new(PasswordCredential::for_user(
            state_dir,
            role != ProcessRole::Hypervisor,
        )),
    }
}

fn state_dir(settings: &StoreSettings) -> Result<PathBuf, CoreError> {
    match &settings.state_dir {
        Some(dir) => Ok(dir.clone()),
        None => system::home_dir()
            .map(|home| home.join(STATE_DIR_NAME))
            .ok_or_else(|| {
                CoreError::Configuration("unable to locate the user state directory".into())
            }),
    }
}

fn login_name() -> Result<String, CoreError> {
    let uid = system::current_uid();
    system::user_name(uid)
        .ok_or_else(|| CoreError::Configuration(format!("no account for uid {uid}")))
}

impl JobContext {
    /// Attach to a job through the configured keystore.
    pub async fn resolve(
        settings: StoreSettings,
        options: ContextOptions,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        let state_dir = state_dir(&settings)?;
        let credentials = credential_source(&settings, options.role, &state_dir);
        let connector = Connector::etcd(
            EtcdConfig::from_settings(&settings),
            credentials,
            login_name()?,
        )
        .with_config(options.connection.clone());
        Self::resolve_with(settings, options, scheduler, connector).await
    }

    /// Attach to a job, reaching the keystore through `connector`.
    pub async fn resolve_with(
        settings: StoreSettings,
        options: ContextOptions,
        scheduler: Arc<dyn Scheduler>,
        connector: Connector,
    ) -> Result<Self, CoreError> {
        let state_dir = state_dir(&settings)?;
        let user = Self::resolve_user(&options, scheduler.as_ref())?;
        let batch_id = Self::resolve_job(&options, scheduler.as_ref(), &user).await?;
        let identity = JobIdentity::new(batch_id, user, options.role);

        let mut ctx = Self {
            identity,
            settings,
            scheduler,
            connector,
            keyspace: OnceCell::new(),
            watch: options.watch.clone(),
            state_dir,
            layout: None,
            placement: None,
            scratch: Vec::new(),
        };

        if !ctx.identity.in_job() || ctx.identity.role.is_detached() {
            debug!(role = %ctx.identity.role, "process not bound to a job");
            return Ok(ctx);
        }

        ctx.attach(&options).await?;
        Ok(ctx)
    }

    fn resolve_user(options: &ContextOptions, scheduler: &dyn Scheduler) -> Result<String, CoreError> {
        if options.role == ProcessRole::User {
            if let Some(user) = &options.batch_user {
                return Ok(user.clone());
            }
        }
        let uid = scheduler.job_owner_uid().unwrap_or_else(system::current_uid);
        system::user_name(uid)
            .ok_or_else(|| CoreError::Configuration(format!("no account for uid {uid}")))
    }

    /// Explicit id, then explicit name, then the job environment, then the
    /// default name. Acting for another user disables the environment and
    /// default lookups.
    async fn resolve_job(
        options: &ContextOptions,
        scheduler: &dyn Scheduler,
        user: &str,
    ) -> Result<JobId, CoreError> {
        if let Some(id) = options.batch_id.filter(|&id| id != 0) {
            return Ok(id);
        }
        if let Some(name) = &options.batch_name {
            return scheduler.job_id_by_name(user, name).await;
        }
        if options.batch_user.is_some() {
            return Ok(0);
        }
        if let Some(id) = scheduler.current_job_id() {
            return Ok(id);
        }
        if let Some(name) = &options.default_batch_name {
            match scheduler.job_id_by_name(user, name).await {
                Ok(id) => return Ok(id),
                Err(CoreError::InvalidJob(reason)) => {
                    debug!(name = %name, reason = %reason, "no job under the default name");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(0)
    }

    async fn attach(&mut self, options: &ContextOptions) -> Result<(), CoreError> {
        let batch_id = self.identity.batch_id;
        let role = self.identity.role;

        let nodes = self
            .scheduler
            .job_node_list(batch_id, &self.identity.user)
            .await?;
        let host = options.hostname.clone().or_else(system::short_hostname);
        let node_rank = host
            .as_deref()
            .and_then(|host| Placement::locate(&nodes, host));
        if node_rank.is_none() && role.requires_placement() {
            return Err(CoreError::Configuration(format!(
                "host {} is not part of job {batch_id}",
                host.as_deref().unwrap_or("<unknown>")
            )));
        }

        let mut layout = ScratchLayout::new(batch_id, &self.state_dir);
        if let Some(tmp) = &options.tmp_dir {
            layout = layout.with_tmp_dir(tmp);
        }

        let rank_map = if role.builds_rank_map() {
            let distribution = self.scheduler.task_distribution(batch_id)?;
            let map = RankMap::from_distribution(&distribution)?;
            if role == ProcessRole::Setup && node_rank == Some(0) {
                self.keyspace().await?.publish_rank_map(&map).await?;
            }
            map
        } else {
            self.keyspace()
                .await?
                .load_rank_map(options.rank_map_timeout)
                .await?
        };
        info!(
            job = batch_id,
            role = %role,
            node_rank = ?node_rank,
            nodes = nodes.len(),
            tasks = rank_map.len(),
            "attached to job"
        );
        self.placement = Some(Placement::new(nodes, node_rank, rank_map));

        match role {
            ProcessRole::Hypervisor => {
                let rank = self.scheduler.task_rank()?;
                self.scratch.push(ScratchDir::create(layout.vm_dir(rank))?);
            }
            ProcessRole::Launcher => {
                self.scratch.push(ScratchDir::create(layout.cluster_dir())?);
            }
            _ => {}
        }
        self.layout = Some(layout);
        Ok(())
    }

    fn only_in_a_job(&self) -> Result<JobId, CoreError> {
        if self.identity.in_job() {
            Ok(self.identity.batch_id)
        } else {
            Err(CoreError::NoJob)
        }
    }

    pub fn identity(&self) -> &JobIdentity {
        &self.identity
    }

    pub fn batch_id(&self) -> JobId {
        self.identity.batch_id
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Keyspace of the job, connecting on the first call.
    pub async fn keyspace(&self) -> Result<&Keyspace, CoreError> {
        self.keyspace
            .get_or_try_init(|| async {
                let conn = self.connector.connect().await?;
                let ns = KeyNamespace::new(
                    self.settings.root.clone(),
                    self.identity.user.clone(),
                    self.identity.batch_id,
                );
                Ok::<_, CoreError>(
                    Keyspace::new(Arc::new(conn), ns).with_watch_config(self.watch.clone()),
                )
            })
            .await
    }

    pub fn placement(&self) -> Result<&Placement, CoreError> {
        self.only_in_a_job()?;
        self.placement.as_ref().ok_or(CoreError::NoJob)
    }

    pub fn scratch_layout(&self) -> Result<&ScratchLayout, CoreError> {
        self.only_in_a_job()?;
        self.layout.as_ref().ok_or(CoreError::NoJob)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn num_nodes(&self) -> Result<usize, CoreError> {
        Ok(self.placement()?.num_nodes())
    }

    pub fn is_rank_local(&self, rank: TaskRank) -> Result<bool, CoreError> {
        Ok(self.placement()?.is_rank_local(rank))
    }

    pub fn task_rank(&self) -> Result<TaskRank, CoreError> {
        self.only_in_a_job()?;
        self.scheduler.task_rank()
    }

    pub fn cluster_definition(&self) -> Result<String, CoreError> {
        self.only_in_a_job()?;
        self.scheduler.cluster_definition()
    }

    /// Cores bound to the current task.
    pub async fn coreset(&self) -> Result<Vec<u32>, CoreError> {
        self.only_in_a_job()?;
        self.scheduler.task_core_affinity().await
    }

    /// Cores allocated per task.
    pub async fn num_cores(&self) -> Result<usize, CoreError> {
        self.only_in_a_job()?;
        match self.scheduler.cpus_per_task() {
            Some(n) => Ok(n),
            None => Ok(self.coreset().await?.len()),
        }
    }

    /// Memory allocated per core, in megabytes.
    pub async fn mem_per_core(&self) -> Result<u64, CoreError> {
        let job = self.only_in_a_job()?;
        let cores = self.num_cores().await?;
        self.scheduler.memory_per_core(job, cores).await
    }

    pub async fn find_job_by_name(&self, name: &str) -> Result<JobId, CoreError> {
        self.scheduler.job_id_by_name(&self.identity.user, name).await
    }

    pub async fn list_all_jobs(&self) -> Result<Vec<JobId>, CoreError> {
        self.scheduler.all_job_ids().await
    }

    /// Environment handed to allocation commands.
    async fn allocation_env(&self) -> Result<Vec<(String, String)>, CoreError> {
        if self.identity.in_job() {
            return Err(CoreError::Allocation("already in a job".into()));
        }
        let mut env = Vec::with_capacity(2);
        if self.settings.etcd_auth_type == AuthKind::Password {
            let secret = self.connector.credentials().credential().await?;
            env.push(("PCOCC_REQUEST_CRED".to_string(), secret));
        }
        env.push(("SLURM_DISTRIBUTION".to_string(), "block:block".to_string()));
        Ok(env)
    }

    /// Run an interactive allocation, returning its exit code.
    pub async fn allocate(&self, args: &[String]) -> Result<i32, CoreError> {
        let env = self.allocation_env().await?;
        self.scheduler.allocate(args, &env).await
    }

    /// Submit a batch allocation.
    pub async fn submit(&self, args: &[String]) -> Result<(), CoreError> {
        let env = self.allocation_env().await?;
        self.scheduler.submit(args, &env).await
    }

    /// Set up the keystore role, user and directories of the job.
    pub async fn init_cluster_keys(&self) -> Result<(), CoreError> {
        self.only_in_a_job()?;
        let requested = self.scheduler.requested_credential();
        self.keyspace()
            .await?
            .init_cluster_keys(requested.as_deref())
            .await
    }

    pub async fn cleanup_cluster_keys(&self) -> Result<(), CoreError> {
        self.only_in_a_job()?;
        self.keyspace().await?.cleanup_cluster_keys().await
    }
}
