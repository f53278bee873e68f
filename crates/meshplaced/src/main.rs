//! meshplaced — the meshplace daemon.
//!
//! Assembles the scheduling subsystems in one process:
//! - In-memory cluster, workload and binding stores
//! - Domain topology and its update feed
//! - Scheduler (plugin pipeline, binder, SLA admission)
//! - Workload controller and its worker pool
//!
//! # Usage
//!
//! ```text
//! meshplaced run --config meshplace.toml --seed seed.json
//! meshplaced schedule --seed seed.json --workload default/shop
//! ```

mod seed;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meshplace_controller::{
    Backoff, MemoryStore, WorkQueue, WorkloadController, controller_rate_limiter, topology_feed,
};
use meshplace_core::{MeshplaceConfig, ResourceBinding};
use meshplace_scheduler::Scheduler;
use meshplace_topology::{AdmittedFlow, DomainTopology};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::seed::Seed;

#[derive(Parser)]
#[command(name = "meshplaced", about = "meshplace multi-cluster scheduling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller over a seeded fleet until Ctrl-C.
    Run {
        /// Configuration file (meshplace.toml). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed file with clusters, topology reports and workloads.
        #[arg(long)]
        seed: PathBuf,
    },
    /// Schedule one workload from the seed and print the result as JSON.
    Schedule {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        seed: PathBuf,

        /// Workload key, `namespace/name`.
        #[arg(long)]
        workload: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,meshplaced=debug,meshplace=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, seed } => run(config.as_deref(), &seed).await,
        Command::Schedule {
            config,
            seed,
            workload,
        } => schedule_once(config.as_deref(), &seed, &workload),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MeshplaceConfig> {
    let Some(path) = path else {
        return Ok(MeshplaceConfig::default());
    };
    let config = MeshplaceConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    info!(path = ?path, "configuration loaded");
    Ok(config)
}

async fn run(config_path: Option<&Path>, seed_path: &Path) -> anyhow::Result<()> {
    info!("meshplace daemon starting");

    let config = load_config(config_path)?;
    let seed = Seed::from_file(seed_path)?;
    info!(
        clusters = seed.clusters.len(),
        domains = seed.topology.len(),
        workloads = seed.workloads.len(),
        "seed loaded"
    );

    // ── Initialize subsystems ──────────────────────────────────

    let store = Arc::new(MemoryStore::new());
    seed.load_clusters(&store);

    let topology = Arc::new(DomainTopology::new());
    let scheduler = Arc::new(Scheduler::from_config(&config, Arc::clone(&topology))?);
    info!(
        max_binding_attempts = config.scheduler.max_binding_attempts,
        "scheduler initialized"
    );

    let queue = WorkQueue::new(Box::new(controller_rate_limiter(&config.queue)));
    let controller = Arc::new(
        WorkloadController::new(scheduler, store.clone(), store.clone(), store.clone(), queue)
            .with_backoff(Backoff::from(&config.retry)),
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let (updates, feed) = topology_feed::channel(Arc::clone(&topology), 64);
    let feed_handle = tokio::spawn(feed.run(shutdown_rx.clone()));
    for update in &seed.topology {
        updates.send(update.to_bytes()?).await?;
    }

    let controller_handle = tokio::spawn(
        Arc::clone(&controller).run(config.scheduler.workers, shutdown_rx),
    );

    for record in seed.workloads {
        let stored = store.put_workload(record);
        controller.on_add(&stored.value);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    drop(updates);

    let stats = feed_handle.await?;
    info!(applied = stats.applied, skipped = stats.skipped, "topology feed stopped");
    controller_handle.await?;

    info!("meshplace daemon stopped");
    Ok(())
}

#[derive(Serialize)]
struct ScheduleReport<'a> {
    binding: &'a ResourceBinding,
    attempts: u32,
    flows: &'a [AdmittedFlow],
}

fn schedule_once(config_path: Option<&Path>, seed_path: &Path, key: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let seed = Seed::from_file(seed_path)?;
    let record = seed
        .workload(key)
        .with_context(|| format!("workload {key} not found in seed"))?;

    let topology = Arc::new(seed.topology()?);
    let scheduler = Scheduler::from_config(&config, topology)?;
    let outcome = scheduler.schedule(
        &record.descriptor,
        record.requirement.as_ref(),
        &seed.ready_clusters(),
        &CancellationToken::new(),
    )?;

    let report = ScheduleReport {
        binding: &outcome.binding,
        attempts: outcome.attempts,
        flows: outcome.reservation.flows(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
