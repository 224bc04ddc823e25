#![allow(dead_code)]

mod breaker;
mod client;
mod config;
mod db;
mod notify;
mod policy;
mod scheduler;
mod scoring;
mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::signal;
use tokio::sync::watch;

use crate::breaker::CircuitBreaker;
use crate::client::{HttpApiClient, MetricsClient, PolicyBackend};
use crate::config::Config;
use crate::db::Database;
use crate::notify::EventSink;
use crate::scheduler::Scheduler;
use crate::state::NodeState;

#[derive(Parser)]
#[command(name = "feesteer", about = "Channel fee policy engine for routing nodes")]
struct Cli {
    /// Path to feesteer.toml config file
    #[arg(short, long, default_value = "feesteer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as a background daemon (default)
    Daemon,
    /// Execute a single evaluation cycle and exit
    RunOnce,
    /// Print current status from the audit database
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    let log_level = config.general.log_level.clone();
    env_logger::Builder::new()
        .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
        .format_timestamp_secs()
        .init();

    info!("feesteer v{} starting", env!("CARGO_PKG_VERSION"));

    let db = Arc::new(Database::open(&config.general.database_path)?);

    if matches!(cli.command, Some(Commands::Status)) {
        return print_status(&db);
    }

    if config.general.dry_run {
        warn!("DRY-RUN MODE: decisions are computed and audited, never applied");
    }
    if !config.general.enabled {
        warn!("Master switch is OFF -- exiting");
        return Ok(());
    }

    let config = Arc::new(config);
    let client = Arc::new(HttpApiClient::new(&config)?);
    let breaker = Arc::new(Mutex::new(CircuitBreaker::new(&config.breaker)));
    let sink = notify::from_config(&config.notify)?;

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => run_daemon(config, client, db, breaker, sink).await,
        Commands::RunOnce => run_once(config, client, db, breaker, sink).await,
        Commands::Status => unreachable!(),
    }
}

async fn run_daemon<C>(
    config: Arc<Config>,
    client: Arc<C>,
    db: Arc<Database>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    sink: Arc<dyn EventSink>,
) -> anyhow::Result<()>
where
    C: MetricsClient + PolicyBackend + 'static,
{
    // Startup connectivity check
    info!("Verifying backend connectivity...");
    match client.list_channels().await {
        Ok(channels) => {
            info!("Connected to policy backend: {} channels", channels.len());
        }
        Err(e) => {
            error!("Cannot reach policy backend: {:#}. Aborting.", e);
            return Err(e);
        }
    }

    // Shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal, finishing current cycle...");
        let _ = shutdown_tx.send(true);
    });

    let mut sched = Scheduler::new(&config);
    let interval = std::time::Duration::from_secs(config.general.cycle_interval_secs);

    info!(
        "Entering main loop (interval: {}s)",
        config.general.cycle_interval_secs
    );

    loop {
        if *shutdown_rx.borrow() {
            info!("Shutting down gracefully");
            break;
        }

        if let Err(e) = run_cycle(&config, &client, &db, &breaker, &sink, &mut sched).await {
            error!("Cycle error: {:#}", e);
        }

        sched.tick();

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }

    Ok(())
}

async fn run_once<C>(
    config: Arc<Config>,
    client: Arc<C>,
    db: Arc<Database>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    sink: Arc<dyn EventSink>,
) -> anyhow::Result<()>
where
    C: MetricsClient + PolicyBackend + 'static,
{
    info!("Running single cycle...");
    let mut sched = Scheduler::new_force_all(&config);
    run_cycle(&config, &client, &db, &breaker, &sink, &mut sched).await?;
    info!("Single cycle complete");
    Ok(())
}

pub async fn run_cycle<C>(
    config: &Arc<Config>,
    client: &Arc<C>,
    db: &Arc<Database>,
    breaker: &Arc<Mutex<CircuitBreaker>>,
    sink: &Arc<dyn EventSink>,
    sched: &mut Scheduler,
) -> anyhow::Result<()>
where
    C: MetricsClient + PolicyBackend + 'static,
{
    // Phase 1: Collect node state
    let node_state = NodeState::collect(client.as_ref(), config.metrics.window_days).await?;

    // Phase 2: Evaluate, validate, and apply per channel
    let outcome = policy::run(
        config.clone(),
        client.clone(),
        db.clone(),
        breaker.clone(),
        sink.clone(),
        &node_state,
    )
    .await?;
    info!(
        "Cycle finished: {} channels evaluated, {} deferred",
        outcome.evaluated, outcome.deferred
    );

    // Phase 3: Backup retention purge, every Nth cycle
    if sched.should_run_purge() {
        let cutoff =
            policy::epoch_now() - config.general.backup_retention_days as f64 * 86_400.0;
        match db.purge_expired_backups(cutoff) {
            Ok(0) => {}
            Ok(n) => info!("Purged {} expired policy backups", n),
            Err(e) => error!("Backup purge failed: {:#}", e),
        }
    }

    Ok(())
}

fn print_status(db: &Database) -> anyhow::Result<()> {
    let status = db.status()?;

    println!("feesteer Status");
    println!("===============");
    println!("Audit records:          {}", status.audit_records);
    println!("Policy changes applied: {}", status.applied);
    println!("Rolled back:            {}", status.rolled_back);
    println!("Rejected by validator:  {}", status.rejected);
    println!("Backups retained:       {}", status.backups);

    Ok(())
}
