//! Sentry host agent.
//!
//! Keeps an outbound WebSocket to the dashboard gateway and serves
//! interactive shell sessions over it until SIGINT or SIGTERM.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sentry_pty::NativeSpawner;
use sentry_transport::ConnectionManager;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()
        .context("Failed to initialize logging")?;

    let args = Args::parse();
    let config = args.tunnel_config()?;
    if config.api_key.is_empty() {
        tracing::warn!("SENTRY_API_KEY is not set; the gateway will probably reject this agent");
    }
    tracing::info!(
        node_name = %config.node_name,
        gateway = %config.gateway_url,
        "Starting sentry agent"
    );

    let manager = ConnectionManager::new(config, Arc::new(NativeSpawner));
    manager.start();

    shutdown_signal().await?;
    tracing::info!("Shutdown requested");

    manager.stop().await;
    tracing::info!("Sentry agent stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
