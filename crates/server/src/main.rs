//! pageshot server entry point.
//!
//! Boots the HTTP API. Logging is JSON on stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use pageshot_client::SandboxFactory;
use pageshot_core::AppConfig;

mod error;
mod offline;
mod pdf;
mod routes;
mod state;
mod store;

#[cfg(feature = "render")]
async fn sandbox_factory(config: &AppConfig) -> Result<Arc<dyn SandboxFactory>> {
    let factory = pageshot_client::ChromiumFactory::launch(config.chrome_path.as_deref())
        .await
        .context("failed to launch headless browser")?;
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "render"))]
async fn sandbox_factory(_config: &AppConfig) -> Result<Arc<dyn SandboxFactory>> {
    anyhow::bail!("pageshot was built without the `render` feature; no capture backend available")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let factory = sandbox_factory(&config).await?;
    let state = Arc::new(state::AppState::build(&config, factory).await?);
    let app = routes::router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "pageshot listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
