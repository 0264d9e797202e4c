//! Ward Daemon - Main entry point
//!
//! The daemon hosts the app guard and serves the observer and challenge UI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ward_daemon::{DaemonConfig, GuardService, IpcServer};

/// Ward Daemon - Foreground app guard
#[derive(Parser)]
#[command(name = "ward-daemon")]
#[command(about = "Background service that challenges protected apps")]
#[command(version)]
struct Cli {
    /// Path to the daemon config file (default: $WARD_CONFIG or <config_dir>/ward/daemon.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the IPC socket path
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ward_daemon=info,ward_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ward daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("WARD_CONFIG").map(PathBuf::from))
        .unwrap_or_else(DaemonConfig::default_path);

    let mut config = DaemonConfig::load_or_create(&config_path)?;
    if let Some(socket) = cli.socket {
        config.ipc_socket_path = socket;
    }

    // Ensure directories exist
    config.ensure_directories()?;

    let service = Arc::new(GuardService::open(&config)?);
    let ipc_server = IpcServer::new(config.ipc_socket_path.clone(), Arc::clone(&service));

    // Start IPC server
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    // Eager session sweep (lookups check expiry regardless)
    let sweeper_handle = if config.sweep_interval_secs > 0 {
        let interval = Duration::from_secs(config.sweep_interval_secs);
        Some(tokio::spawn(Arc::clone(&service).run_sweeper(interval)))
    } else {
        None
    };

    info!("Daemon started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = ipc_handle => {
            error!("IPC server exited unexpectedly");
        }
    }

    if let Some(handle) = sweeper_handle {
        handle.abort();
    }
    if config.ipc_socket_path.exists() {
        std::fs::remove_file(&config.ipc_socket_path)?;
    }

    info!("Daemon shutting down");

    Ok(())
}
