//! Batch scheduler collaborator.
//!
//! The coordination layer only needs a handful of facts from the scheduler:
//! which job the process runs in, the job's ordered node set, its per-node
//! task distribution and a few resource figures. [`Scheduler`] is that
//! surface; [`SlurmScheduler`] answers it from the SLURM environment and
//! command line tools.

mod slurm;
pub use slurm::{SlurmPrograms, SlurmScheduler, parse_memory_per_core};

use async_trait::async_trait;
use jobkv_model::{JobId, TaskRank};

use crate::CoreError;

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Job the current process was started in, if any.
    fn current_job_id(&self) -> Option<JobId>;

    /// Uid of the owner of the job the process was started for.
    fn job_owner_uid(&self) -> Option<u32>;

    /// Hosts allocated to `job`, in node rank order.
    async fn job_node_list(&self, job: JobId, user: &str) -> Result<Vec<String>, CoreError>;

    /// The single job of `user` named `name`.
    async fn job_id_by_name(&self, user: &str, name: &str) -> Result<JobId, CoreError>;

    async fn all_job_ids(&self) -> Result<Vec<JobId>, CoreError>;

    /// Per-node task counts of `job` in the compressed `count(xN)` notation.
    fn task_distribution(&self, job: JobId) -> Result<String, CoreError>;

    /// Memory granted per core, in megabytes.
    async fn memory_per_core(&self, job: JobId, cores: usize) -> Result<u64, CoreError>;

    /// Cores the current task is bound to.
    async fn task_core_affinity(&self) -> Result<Vec<u32>, CoreError>;

    /// Global rank of the current task.
    fn task_rank(&self) -> Result<TaskRank, CoreError>;

    /// Cores per task when requested explicitly.
    fn cpus_per_task(&self) -> Option<usize>;

    /// Cluster definition handed to node setup processes.
    fn cluster_definition(&self) -> Result<String, CoreError>;

    /// Keystore password the submitter asked to be installed for the job.
    fn requested_credential(&self) -> Option<String>;

    /// Run an interactive allocation and return its exit code.
    async fn allocate(&self, args: &[String], env: &[(String, String)]) -> Result<i32, CoreError>;

    /// Submit a batch job.
    async fn submit(&self, args: &[String], env: &[(String, String)]) -> Result<(), CoreError>;
}
