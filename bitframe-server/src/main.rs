//! bitframe server - HTTP front end for the distributed bitmap index

mod api;
mod client;
mod config;

use bitframe_core::query::Executor;
use bitframe_core::storage::StorageEngine;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::client::HttpClient;
use crate::config::{Args, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_args(&args)?;

    info!("Starting bitframe {}", bitframe_core::VERSION);
    info!("Data directory: {:?}", config.data_dir);
    if let Some(path) = &config.plugins.path {
        info!("Plugin path: {:?}", path);
    }

    let engine = Arc::new(StorageEngine::new(config.storage_config())?);
    let cluster = Arc::new(config.cluster());
    info!(
        "Cluster: {} nodes, {} replicas, {} partitions",
        cluster.nodes().len(),
        cluster.replica_n(),
        cluster.partition_n()
    );

    let executor = Arc::new(Executor::new(engine.clone(), cluster, HttpClient::new()?));
    let app = api::create_router(executor);

    let listener = tokio::net::TcpListener::bind(&config.host).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Fold op logs into snapshots so the next start replays nothing
    if let Err(e) = engine.snapshot_all() {
        warn!("Snapshot on shutdown failed: {}", e);
    }
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
}
