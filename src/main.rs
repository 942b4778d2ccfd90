use std::sync::Arc;

use anyhow::Context;
use storefront_mcp::{
    catalog::{CapabilityCatalog, STOREFRONT_WIDGETS},
    config::ServerConfig,
    server::{McpHttpServer, McpServer},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const INSTRUCTIONS: &str = "Storefront widgets. Use product-search or product-carousel to show products \
matching a query, and order-history to show the customer's past orders.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    // A missing widget template is fatal: the catalog is immutable once serving.
    let catalog = CapabilityCatalog::load(STOREFRONT_WIDGETS, &config.assets_dir)
        .with_context(|| format!("loading widget assets from {}", config.assets_dir.display()))?;

    let app_config = Arc::new(McpServer::new(
        config.server_name.clone(),
        config.server_version.clone(),
        Some(INSTRUCTIONS.to_string()),
        Arc::new(catalog),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    McpHttpServer::start_listener(config, app_config, shutdown).await?;
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl-C only");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, closing sessions");
    shutdown.cancel();
}
