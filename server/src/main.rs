//! Berth runtime server daemon.
//!
//! Restores tracked state, starts the exit monitor and streaming endpoint,
//! serves Prometheus metrics, and shuts down cleanly on SIGINT.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use berth_core::clock::SystemClock;
use berth_core::config::BerthConfig;
use berth_runtime::network::FileNetworkPlugin;
use berth_runtime::oci::ExitFileRuntime;
use berth_runtime::registry::Registry;
use berth_runtime::storage::DirStorage;
use berth_runtime::watch::ExitDirWatcher;

use berth_server::{metrics, Collaborators, Server};

/// Berth Runtime Server
#[derive(Parser, Debug)]
#[command(name = "berthd", about = "Berth Runtime Server")]
struct Args {
    /// Path to the configuration file (JSON); defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the metrics endpoint port.
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BerthConfig::from_file(path)?,
        None => BerthConfig::default(),
    };
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }

    tracing::info!(
        state_dir = %config.state_dir.display(),
        exits_dir = %config.exits_dir.display(),
        stream_port = %config.stream_port,
        "Starting Berth runtime server"
    );

    let storage = Arc::new(DirStorage::new(config.state_dir.join("containers"))?);
    let runtime = Arc::new(ExitFileRuntime::new(&config.exits_dir));
    let network = Arc::new(FileNetworkPlugin::new(&config.network_state_dir)?);

    let server = Server::new(
        config.clone(),
        Collaborators {
            registry: Arc::new(Registry::new()),
            storage,
            runtime,
            network,
            clock: Arc::new(SystemClock),
        },
    )
    .await?;

    metrics::start_metrics_server(config.metrics_port);

    let watcher = ExitDirWatcher::new(&config.exits_dir)?;
    let monitor = server.exit_monitor();
    let monitor_task = tokio::spawn(monitor.run(watcher));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    server.stop_monitors();
    server.stop_stream();
    let _ = monitor_task.await;
    server.shutdown().await?;

    Ok(())
}
