//! # homebound-agent
//!
//! Long-running host for the homebound pipeline.
//!
//! This binary provides:
//! - Quarantine zone monitoring with exit alerts and area-exit reports
//! - Batched location and contact uploads to the backend
//! - A local REST API for quarantine lifecycle and status
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package homebound-agent -- ./homebound.toml
//!
//! # Production
//! HOMEBOUND_PRODUCTION=1 ./homebound-agent
//!
//! # With the BlueZ radio (set `[radio] backend = "bluez"`)
//! cargo run --package homebound-agent --features bluetooth
//! ```
//!
//! The configuration path may also be given in `HOMEBOUND_CONFIG`; without
//! either, the platform default is used when it exists.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use homebound_agent::api::create_router;
use homebound_agent::runtime::{Pipeline, Platform};
use homebound_agent::logging;
use homebound_core::AgentConfig;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOMEBOUND_CONFIG").map(PathBuf::from));
    let config = AgentConfig::load(config_path.as_deref()).context("loading configuration")?;

    let log_dir = logging::init(&config, logging::is_production())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.storage.data_dir.display(),
        log_dir = ?log_dir,
        radio = ?config.radio.backend,
        "Starting homebound-agent"
    );

    let platform = Platform::software(&config).await?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing server address")?;

    let pipeline = Pipeline::start(config, platform).context("starting pipeline")?;
    let app = create_router(pipeline.state());

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
