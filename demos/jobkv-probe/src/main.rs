use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use tracing::info;

use jobkv_core::{ContextOptions, JobContext, SlurmScheduler};
use jobkv_model::{BatchConfig, ProcessRole, Scope};
use jobkv_observe::{LoggerConfig, LoggerLevel, init_logger};

const USAGE: &str = "usage: jobkv-probe <batch.json> [role] [job-id|job-name]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let cfg = LoggerConfig {
        level: LoggerLevel::new("info")?,
        ..Default::default()
    };
    init_logger(&cfg)?;

    // 2) Arguments
    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        bail!(USAGE);
    };
    let role: ProcessRole = match args.next() {
        Some(raw) => raw.parse()?,
        None => ProcessRole::User,
    };
    let mut options = ContextOptions::new(role)
        .with_default_batch_name("pcocc")
        .with_rank_map_timeout(Duration::from_secs(30));
    if let Some(job) = args.next() {
        options = match job.parse() {
            Ok(id) => options.with_batch_id(id),
            Err(_) => options.with_batch_name(job),
        };
    }

    // 3) Settings
    let batch = BatchConfig::from_file(&config_path)
        .with_context(|| format!("loading {config_path}"))?;
    info!(servers = ?batch.settings.etcd_servers, "settings loaded");

    // 4) Job context
    let scheduler = Arc::new(SlurmScheduler::from_env());
    let ctx = JobContext::resolve(batch.settings, options, scheduler).await?;
    let identity = ctx.identity();
    println!("job:  {} (user {}, role {})", identity.batch_id, identity.user, identity.role);
    if !identity.in_job() {
        println!("not attached to a job");
        return Ok(());
    }

    // 5) Placement
    let placement = ctx.placement()?;
    println!(
        "node: {:?} of {} ({})",
        placement.node_rank(),
        placement.num_nodes(),
        placement.nodes().join(",")
    );
    for rank in 0..placement.rank_map().len() {
        println!(
            "rank {rank:>4} -> {} (slot {}){}",
            placement.host_of(rank).unwrap_or("?"),
            placement.position_within_host(rank).unwrap_or(0),
            if placement.is_rank_local(rank) { " local" } else { "" }
        );
    }

    // 6) Keystore
    let keyspace = ctx.keyspace().await?;
    match keyspace.read_dir(Scope::ClusterUser, "").await? {
        Some(dir) => {
            for child in dir.children() {
                println!("key:  {}", child.key);
            }
        }
        None => println!("no keys for this job yet"),
    }

    Ok(())
}
