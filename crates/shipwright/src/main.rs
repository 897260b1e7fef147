//! # Shipwright - PeerFleet provisioning engine
//!
//! Derives a fleet of paired storage node + coordinator units from a single
//! fleet size, carves each unit its own shared-storage partitions, attaches
//! the fleet ingress policy, registers discovery names and launches the
//! units.
//!
//! ## Flow
//! ```text
//! bootstrap → security policy → topology build → launch → lifecycle
//!     ↓              ↓                ↓
//!  handles       boundaries     storage + discovery (memory or Redis)
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peerfleet_common::HealthCheck;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod discovery;
mod lifecycle;
mod manifest;
mod network;
mod provisioner;
mod routes;
mod secret;
mod security;
mod state;
mod storage;
mod topology;

use config::AppConfig;
use lifecycle::LifecycleTracker;
use provisioner::{Collaborators, Provisioner};
use state::AppState;

/// Shipwright - PeerFleet provisioning engine
#[derive(Parser, Debug)]
#[command(name = "shipwright")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config/shipwright.toml")]
    config: String,

    /// Redis URL; selects the Redis storage and discovery backends
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Fleet size (overrides config)
    #[arg(short, long, global = true)]
    peers: Option<u32>,

    /// Shared cluster secret
    #[arg(long, global = true, env = "IPFS_CLUSTER_SECRET", hide_env_values = true)]
    cluster_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, global = true, default_value = "false")]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the fleet topology without launching and print its manifest
    Plan {
        /// Write the manifest to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Provision the fleet and serve the HTTP control surface
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long, env = "LISTEN_ADDR")]
        listen: Option<String>,
    },

    /// Print a freshly generated cluster secret
    Secret,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    match &args.command {
        Command::Secret => {
            println!("{}", secret::generate_cluster_secret().expose());
            Ok(())
        }
        Command::Plan { output } => {
            init_logging(&args.log_level, args.json_logs)?;
            let (provisioner, config) = setup(&args).await?;
            plan(&provisioner, config.peers, output.as_deref()).await
        }
        Command::Serve { listen } => {
            init_logging(&args.log_level, args.json_logs)?;
            let (provisioner, config) = setup(&args).await?;
            let listen_addr = listen.clone().unwrap_or(config.listen_addr);
            serve(provisioner, config.peers, &listen_addr).await
        }
    }
}

/// Load configuration and connect the state backends
async fn setup(args: &Args) -> Result<(Provisioner, AppConfig)> {
    info!("Starting Shipwright v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(&args.config, args)?;
    info!(peers = config.peers, "Configuration loaded from {}", args.config);

    let tracker = Arc::new(LifecycleTracker::new(HealthCheck::default()));
    let collaborators = match config.redis_url.as_deref() {
        Some(url) => {
            let collaborators = Collaborators::redis(&config, url, tracker.clone())
                .await
                .context("Failed to connect to Redis")?;
            info!("Redis state backend connected");
            collaborators
        }
        None => {
            info!("Using in-memory state backend");
            Collaborators::in_memory(&config, tracker.clone())
        }
    };

    let provisioner = Provisioner::new(config.clone(), collaborators, tracker)?;
    Ok((provisioner, config))
}

async fn plan(provisioner: &Provisioner, peers: u32, output: Option<&Path>) -> Result<()> {
    let handles = provisioner.bootstrap().await?;
    let report = provisioner.plan(&handles, peers).await?;
    let statuses = provisioner.tracker().snapshot().await;
    let json = manifest::render(&report, &statuses)
        .to_json_pretty()
        .context("Failed to render manifest")?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Manifest written to {}", path.display());
        }
        None => println!("{}", json),
    }

    if !report.topology.is_complete() {
        anyhow::bail!(
            "{} of {} peer units failed to build",
            report.topology.failures.len(),
            peers
        );
    }
    Ok(())
}

async fn serve(provisioner: Provisioner, peers: u32, listen_addr: &str) -> Result<()> {
    let state = AppState::new(provisioner, peers).await?;
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("Shipwright listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shipwright shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
