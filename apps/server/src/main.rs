//! Lectern Server - standalone headless content-ingestion server.
//!
//! Hosts the HTTP API (ingestion with SSE progress, reprocessing,
//! content sources, discovery control), the periodic discovery workers,
//! and the media retention cleanup, all on one runtime.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lectern_core::{bootstrap_services, start_server};
use tokio::signal;

use crate::config::ServerConfig;

/// Lectern Server - headless content ingestion and analysis server.
#[derive(Parser, Debug)]
#[command(name = "lectern-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LECTERN_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "LECTERN_BIND_PORT")]
    port: Option<u16>,

    /// Skip starting the discovery and cleanup workers.
    #[arg(long, env = "LECTERN_NO_WORKERS")]
    no_workers: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Lectern Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: bind={}:{}, discovery_interval={}m, cleanup_interval={}h",
        config.bind_addr,
        config.bind_port,
        config.discovery_interval_minutes,
        config.cleanup_interval_hours
    );

    // Bootstrap services
    let core_config = config.to_core_config();
    let services = bootstrap_services(core_config)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Start background workers (discovery sweeps, media cleanup)
    if args.no_workers {
        log::info!("Background workers disabled (--no-workers)");
    } else {
        services.start_background_tasks();
        log::info!("Background tasks started");
    }

    // Spawn HTTP server on the main runtime
    let addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let app_state = services.app_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, addr).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
