use std::collections::HashMap;

use async_trait::async_trait;
use jobkv_exec::{ExecError, ProcConfig, capture, cpu_affinity, run_inherited};
use jobkv_model::{JobId, TaskRank, expand_node_set, expand_range_set};
use tracing::{debug, warn};

use super::Scheduler;
use crate::CoreError;

const JOB_ID_ENV: &str = "SLURM_JOB_ID";
const JOB_UID_ENV: &str = "SLURM_JOB_UID";
const NODELIST_ENV: &str = "SLURM_NODELIST";
const TASKS_PER_NODE_ENV: &str = "SLURM_TASKS_PER_NODE";
const PROCID_ENV: &str = "SLURM_PROCID";
const CPUS_PER_TASK_ENV: &str = "SLURM_CPUS_PER_TASK";
const SETUP_ENV: &str = "SPANK_PCOCC_SETUP";
const REQUEST_CRED_ENV: &str = "SPANK_PCOCC_REQUEST_CRED";

/// Executables the scheduler shells out to.
#[derive(Debug, Clone)]
pub struct SlurmPrograms {
    pub squeue: String,
    pub scontrol: String,
    pub salloc: String,
    pub sbatch: String,
    pub hwloc_bind: String,
    pub hwloc_calc: String,
}

impl Default for SlurmPrograms {
    fn default() -> Self {
        Self {
            squeue: "squeue".into(),
            scontrol: "scontrol".into(),
            salloc: "salloc".into(),
            sbatch: "sbatch".into(),
            hwloc_bind: "hwloc-bind".into(),
            hwloc_calc: "hwloc-calc".into(),
        }
    }
}

/// SLURM answers, read from a snapshot of the process environment and from
/// the SLURM command line tools.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    env: HashMap<String, String>,
    programs: SlurmPrograms,
}

impl SlurmScheduler {
    pub fn from_env() -> Self {
        Self::with_env(std::env::vars())
    }

    pub fn with_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            programs: SlurmPrograms::default(),
        }
    }

    pub fn with_programs(mut self, programs: SlurmPrograms) -> Self {
        self.programs = programs;
        self
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    fn required(&self, name: &str) -> Result<&str, CoreError> {
        self.var(name)
            .ok_or_else(|| CoreError::Batch(format!("{name} is not set")))
    }

    async fn squeue<I, S>(&self, args: I) -> Result<String, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cfg = ProcConfig::new(self.programs.squeue.as_str()).args(args);
        Ok(capture(&cfg).await?.stdout)
    }

    fn extra_env(cfg: ProcConfig, env: &[(String, String)]) -> ProcConfig {
        env.iter().fold(cfg, |cfg, (k, v)| cfg.env(k.as_str(), v.as_str()))
    }

    async fn hwloc_cores(&self) -> Result<Vec<u32>, CoreError> {
        let mask = capture(&ProcConfig::new(self.programs.hwloc_bind.as_str()).arg("--get")).await?;
        let cores = capture(
            &ProcConfig::new(self.programs.hwloc_calc.as_str())
                .args(["--intersect", "Core"])
                .arg(mask.stdout.trim()),
        )
        .await?;
        let cores = cores.stdout.trim();
        expand_range_set(cores)
            .map_err(|e| CoreError::Batch(format!("unexpected core set {cores:?}: {e}")))
    }
}

/// Memory per core in megabytes from `scontrol show job` output.
///
/// A per-CPU figure (`MinMemoryCPU=<n>M`) wins; otherwise the per-node
/// figure (`MinMemoryNode=<n>M` or `<n>G`) is split across `cores`.
pub fn parse_memory_per_core(raw: &str, cores: usize) -> Option<u64> {
    let field = |name: &str| {
        raw.split_whitespace()
            .find_map(|token| token.strip_prefix(name))
            .and_then(|value| {
                let (digits, unit) = value.split_at(value.find(|c: char| !c.is_ascii_digit())?);
                Some((digits.parse::<u64>().ok()?, unit.chars().next()?))
            })
    };

    if let Some((mb, 'M')) = field("MinMemoryCPU=") {
        return Some(mb);
    }
    let cores = u64::try_from(cores).ok().filter(|&c| c > 0)?;
    match field("MinMemoryNode=")? {
        (mb, 'M') => Some(mb / cores),
        (gb, 'G') => Some(gb * 1024 / cores),
        _ => None,
    }
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    fn current_job_id(&self) -> Option<JobId> {
        self.var(JOB_ID_ENV)?.trim().parse().ok()
    }

    fn job_owner_uid(&self) -> Option<u32> {
        self.var(JOB_UID_ENV)?.trim().parse().ok()
    }

    async fn job_node_list(&self, job: JobId, user: &str) -> Result<Vec<String>, CoreError> {
        let invalid = || CoreError::InvalidJob(format!("no valid match for id {job}"));

        if self.current_job_id() == Some(job) {
            if let Some(nodes) = self.var(NODELIST_ENV) {
                return expand_node_set(nodes).map_err(|_| invalid());
            }
        }

        let job_arg = job.to_string();
        let out = self
            .squeue(["-j", job_arg.as_str(), "-u", user, "-h", "-o", "%N"])
            .await
            .map_err(|e| {
                debug!(job, error = %e, "node list query failed");
                invalid()
            })?;
        expand_node_set(out.trim()).map_err(|_| invalid())
    }

    async fn job_id_by_name(&self, user: &str, name: &str) -> Result<JobId, CoreError> {
        let no_match = || CoreError::InvalidJob(format!("no valid match for name {name}"));

        let out = self
            .squeue(["-n", name, "-u", user, "-h", "-o", "%i"])
            .await
            .map_err(|_| no_match())?;
        let out = out.trim();
        if out.is_empty() {
            return Err(no_match());
        }
        out.parse()
            .map_err(|_| CoreError::InvalidJob(format!("name {name} is ambiguous")))
    }

    async fn all_job_ids(&self) -> Result<Vec<JobId>, CoreError> {
        let out = self.squeue(["-ho", "%A"]).await.map_err(|e| {
            CoreError::Batch(format!("unable to retrieve SLURM job list: {e}"))
        })?;
        out.split_whitespace()
            .map(|id| {
                id.parse()
                    .map_err(|_| CoreError::Batch(format!("unexpected job id {id:?} in job list")))
            })
            .collect()
    }

    fn task_distribution(&self, job: JobId) -> Result<String, CoreError> {
        if self.current_job_id() != Some(job) {
            return Err(CoreError::Batch(format!(
                "task distribution of job {job} is only known inside the job"
            )));
        }
        self.required(TASKS_PER_NODE_ENV).map(str::to_string)
    }

    async fn memory_per_core(&self, job: JobId, cores: usize) -> Result<u64, CoreError> {
        let cfg = ProcConfig::new(self.programs.scontrol.as_str())
            .args(["show", &format!("jobid={job}")]);
        let out = capture(&cfg).await?;
        parse_memory_per_core(&out.stdout, cores)
            .ok_or_else(|| CoreError::Batch("failed to read memory per core".into()))
    }

    async fn task_core_affinity(&self) -> Result<Vec<u32>, CoreError> {
        match self.hwloc_cores().await {
            Ok(cores) => Ok(cores),
            Err(CoreError::Exec(ExecError::Spawn { program, reason })) => {
                warn!(program = %program, reason = %reason, "hwloc unavailable, using the process affinity mask");
                Ok(cpu_affinity()?)
            }
            Err(e) => Err(e),
        }
    }

    fn task_rank(&self) -> Result<TaskRank, CoreError> {
        let raw = self.required(PROCID_ENV)?;
        raw.trim()
            .parse()
            .map_err(|_| CoreError::Batch(format!("invalid {PROCID_ENV}: {raw:?}")))
    }

    fn cpus_per_task(&self) -> Option<usize> {
        self.var(CPUS_PER_TASK_ENV)?.trim().parse().ok()
    }

    fn cluster_definition(&self) -> Result<String, CoreError> {
        self.required(SETUP_ENV).map(str::to_string)
    }

    fn requested_credential(&self) -> Option<String> {
        self.var(REQUEST_CRED_ENV).map(str::to_string)
    }

    async fn allocate(&self, args: &[String], env: &[(String, String)]) -> Result<i32, CoreError> {
        let cfg = Self::extra_env(
            ProcConfig::new(self.programs.salloc.as_str()).args(args.iter().cloned()),
            env,
        );
        run_inherited(&cfg)
            .await
            .map_err(|e| CoreError::Allocation(e.to_string()))
    }

    async fn submit(&self, args: &[String], env: &[(String, String)]) -> Result<(), CoreError> {
        let cfg = Self::extra_env(
            ProcConfig::new(self.programs.sbatch.as_str()).args(args.iter().cloned()),
            env,
        );
        match run_inherited(&cfg).await {
            Ok(0) => Ok(()),
            Ok(code) => Err(CoreError::Allocation(format!(
                "{} exited with code {code}",
                self.programs.sbatch
            ))),
            Err(e) => Err(CoreError::Allocation(e.to_string())),
        }
    }
}
