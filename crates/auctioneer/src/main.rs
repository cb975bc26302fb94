//! auctioneer: places LRP instances and tasks onto cells.
//!
//! Single binary that assembles:
//! - HTTP intake (`/v1/lrps/auctions`, `/v1/tasks/auctions`)
//! - Auction runner over a static cell roster
//! - Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! auctioneer run --config /etc/auctioneer/auctioneer.toml
//! auctioneer check-config --config auctioneer.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use auction::{AuctionRunner, SystemClock, WorkPool};
use clap::{Parser, Subcommand};
use tokio::sync::{oneshot, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auctioneer::config::{AuctioneerConfig, LogFormat};
use auctioneer::delegate::StaticRosterDelegate;
use auctioneer::metrics::AuctionMetrics;
use auctioneer::{AppState, build_router};

const DEFAULT_LOG_FILTER: &str = "info,auctioneer=debug,auction=debug";

#[derive(Parser)]
#[command(name = "auctioneer", about = "Cell placement auctioneer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the intake API and run auctions until Ctrl-C.
    Run {
        /// Path to auctioneer.toml.
        #[arg(long, default_value = "/etc/auctioneer/auctioneer.toml")]
        config: PathBuf,
    },

    /// Parse and validate a config file, then exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = AuctioneerConfig::from_file(&config)?;
            init_tracing(config.log_format);
            run(config).await
        }
        Command::CheckConfig { config } => {
            let parsed = AuctioneerConfig::from_file(&config)?;
            println!("{}: ok ({} cells)", config.display(), parsed.cells.len());
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn run(config: AuctioneerConfig) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    info!(
        %addr,
        cells = config.cells.len(),
        workers = config.auction_runner_workers,
        "auctioneer starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Auction runner ─────────────────────────────────────────

    let metrics = Arc::new(AuctionMetrics::new());
    let delegate = Arc::new(StaticRosterDelegate::from_config(&config));
    let pool = WorkPool::new(config.auction_runner_workers)
        .context("invalid auction_runner_workers")?;
    let runner = Arc::new(
        AuctionRunner::new(
            delegate,
            metrics.clone(),
            Arc::new(SystemClock),
            pool,
            config.starting_container_weight,
            config.starting_container_count_maximum,
        )
        .with_fetch_retry(config.fetch_retry_policy()),
    );

    let (ready_tx, ready_rx) = oneshot::channel();
    let runner_handle = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(shutdown_rx, ready_tx).await }
    });
    ready_rx.await.context("auction runner exited before becoming ready")?;

    // ── HTTP server ────────────────────────────────────────────

    let router = build_router(AppState { runner, metrics });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = runner_handle.await;

    info!("auctioneer stopped");
    Ok(())
}
