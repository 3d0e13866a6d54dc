use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use mobile_core::config::{Config, Platform};
use tracing_subscriber::EnvFilter;

mod adb;
mod bridge;
mod platform;
mod registry;
mod server;
mod service;
mod simctl;
mod types;
mod uia2;
mod wda;

use crate::service::MobileService;

/// Mobile automation worker: translates platform-agnostic commands into
/// UIAutomator2 or WebDriverAgent calls.
#[derive(FromArgs)]
struct Cli {
    /// platform to drive (android or ios), overrides WORKER_PLATFORM
    #[argh(option)]
    platform: Option<String>,
    /// listen address, overrides LISTEN_ADDR
    #[argh(option)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();
    let platform = match &cli.platform {
        Some(raw) => Some(raw.parse::<Platform>().map_err(anyhow::Error::msg)?),
        None => None,
    };
    let mut cfg = Config::from_env_for(platform);
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let driver = platform::driver_for(&cfg);
    let service = Arc::new(MobileService::new(cfg.clone(), driver));
    let app = server::router(Arc::clone(&service));

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("bind {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, platform = cfg.platform.as_str(), "mobile worker started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve failed")?;

    // Executors drain before the snapshot store stops its cleanup task.
    service.close().await;
    tracing::info!("mobile worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
