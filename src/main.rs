//! # Synapse daemon
//!
//! Runs the durable message bus, the node registry and the agent swarm in
//! one process.
//!
//! ## Startup
//!
//! 1. **Configuration** - one TOML file, overridden by `--listen`
//! 2. **Durable log** - SurrealDB stream plus consumer offsets
//! 3. **Bus** - registry, dispatcher, tailer, liveness sweeper, registry sync
//! 4. **Swarm** - actor with timers and the remote completion listener
//! 5. **Gateway** - axum WebSocket endpoint for remote nodes
//!
//! ## Shutdown
//!
//! Ctrl-C flips a shared watch flag; every loop exits on it, then the swarm
//! actor is stopped.

#![forbid(unsafe_code)]

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use orchestrator::SwarmController;
use synapse_core::telemetry::init_tracing;
use synapse_events::{
    DurableLog, LogTailer, MessageBus, NodeKind, NodeRegistration, NodeRegistry, SurrealLog, SurrealOffsetStore,
    TracingLog, db, socket, spawn_registry_sync, spawn_sweeper,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::SynapseConfig;

/// Durable message bus and self-healing agent swarm.
#[derive(Debug, Parser)]
#[command(name = "synapse", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway listen address, overriding the configuration.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SynapseConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.gateway.listen_addr = listen;
    }
    init_tracing(&config.telemetry).context("Failed to initialize tracing")?;
    config.validate().context("Invalid configuration")?;

    info!(node_id = %config.bus.node_id, "Synapse starting");
    run(config).await
}

async fn run(config: SynapseConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Durable log
    let database = db::connect(&config.log_store)
        .await
        .context("Failed to connect to the log store")?;
    let log = SurrealLog::open(Arc::clone(&database), &config.log_store)
        .await
        .context("Failed to open the durable log")?;
    let log: Arc<dyn DurableLog> = Arc::new(TracingLog::new(log));
    let offsets = Arc::new(SurrealOffsetStore::new(database));
    info!(url = %config.log_store.url, stream = %config.log_store.stream, "Durable log ready");

    // Bus
    let registry = Arc::new(NodeRegistry::new(config.registry));
    let dispatcher = Arc::new(config.bus.dispatcher());
    let bus = Arc::new(MessageBus::new(
        config.bus.clone(),
        Arc::clone(&log),
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
    ));
    let tailer = Arc::new(LogTailer::new(log, offsets, dispatcher, config.tail.clone()));

    let mut workers = vec![
        spawn_sweeper(Arc::clone(&registry), shutdown_rx.clone()),
        spawn_registry_sync(&bus, shutdown_rx.clone()),
    ];
    bus.register_self(NodeRegistration::new(bus.node_id().clone(), NodeKind::Service))
        .await
        .context("Failed to register the daemon node")?;

    // Swarm
    let (swarm, swarm_handle) = SwarmController::spawn(config.swarm.clone(), Arc::clone(&bus))
        .await
        .context("Failed to start the swarm")?;
    workers.push(swarm.spawn_completion_listener(shutdown_rx.clone()).await);
    workers.push(tailer.spawn(shutdown_rx.clone()));
    swarm.start_timers().context("Failed to start swarm timers")?;

    // Gateway
    let listener = TcpListener::bind(config.gateway.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.gateway.listen_addr))?;
    let gateway = tokio::spawn(socket::serve(listener, Arc::clone(&bus), shutdown_rx));

    info!(listen_addr = %config.gateway.listen_addr, "Synapse ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    // Receivers may already be gone if a worker exited early.
    let _ = shutdown_tx.send(true);

    match gateway.await {
        Ok(Err(e)) => error!(error = %e, "Gateway stopped with an error"),
        Err(e) => error!(error = %e, "Gateway task panicked"),
        Ok(Ok(())) => {}
    }
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Background task failed");
        }
    }

    swarm.stop(Some("shutdown".to_string()));
    if let Err(e) = swarm_handle.await {
        error!(error = %e, "Swarm actor failed");
    }

    info!("Synapse stopped");
    Ok(())
}
