//! taskgridd — the TaskGrid daemon.
//!
//! Single binary that assembles the orchestrator:
//! - Route table (from the SDK's manifest)
//! - Resource ledger
//! - Worker pools + heartbeat supervision
//! - Best-fit scheduler
//! - HTTP surface (dispatch pipeline + control API)
//!
//! # Usage
//!
//! ```text
//! taskgridd run --config taskgrid.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use taskgrid_api::{ApiState, Fallback, build_router};
use taskgrid_core::config::{FallbackMode, TaskGridConfig};
use taskgrid_ledger::ResourceLedger;
use taskgrid_pool::PoolManager;
use taskgrid_routes::{RouteTable, load_manifest};
use taskgrid_scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "taskgridd", about = "TaskGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator.
    Run {
        /// Path to taskgrid.toml.
        #[arg(long, default_value = "taskgrid.toml")]
        config: PathBuf,

        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskgridd=debug,taskgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, port } => run(config, port).await,
    }
}

async fn run(config_path: PathBuf, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("TaskGrid daemon starting");

    let config = TaskGridConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // ── Route table ────────────────────────────────────────────

    let manifest = load_manifest(&config.route_manifest)
        .with_context(|| format!("loading route manifest {}", config.route_manifest.display()))?;
    let routes = Arc::new(RouteTable::from_manifest(manifest).context("building route table")?);
    info!(routes = routes.len(), "route table built");

    // ── Fallback collaborator ──────────────────────────────────

    let fallback = match &config.fallback {
        None => Fallback::None,
        Some(fb) => match fb.mode {
            FallbackMode::Proxy => {
                let target = fb
                    .target
                    .clone()
                    .context("fallback.target required in proxy mode")?;
                info!(%target, "fallback proxy configured");
                Fallback::Proxy {
                    base_url: target,
                    timeout: fb.timeout()?,
                }
            }
            FallbackMode::Mounted => {
                // A mounted handler comes from an embedding
                // application that builds the router itself; the
                // standalone daemon has nothing to mount.
                anyhow::bail!(
                    "fallback.mode = \"mounted\" requires an embedding application; \
                     taskgridd supports proxy mode"
                );
            }
        },
    };

    // ── Worker pools ───────────────────────────────────────────

    let ledger = Arc::new(ResourceLedger::new());
    let pool = Arc::new(PoolManager::new(
        config.worker.clone(),
        config.pools.clone(),
        Arc::clone(&ledger),
    )?);
    pool.start().await.context("starting worker pools")?;

    let scheduler = Arc::new(Scheduler::new(Arc::clone(&pool)));
    info!("scheduler initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Supervision loop ───────────────────────────────────────

    let supervisor = {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            pool.run(shutdown).await;
        })
    };

    // ── HTTP server ────────────────────────────────────────────

    let state = ApiState {
        routes,
        scheduler,
        pool: Arc::clone(&pool),
        fallback: Arc::new(fallback),
        task_timeout: config.worker.task_timeout()?,
    };
    let router = build_router(state);

    let port = port_override.unwrap_or(config.http.port);
    let addr: SocketAddr = format!("{}:{}", config.http.host, port)
        .parse()
        .context("invalid listen address")?;

    info!(%addr, "HTTP server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Drain background work, then take the workers down.
    let _ = supervisor.await;
    pool.shutdown_all().await;

    info!("TaskGrid daemon stopped");
    Ok(())
}
