mod auth;
mod command;
mod config;
mod connection;
mod http;
mod registry;
#[cfg(test)]
mod testing;
mod transport;

use anyhow::{Context, Result};
use auth::TokenStore;
use clap::Parser;
use command::Dispatcher;
use config::{Cli, RelayConfig};
use connection::ClientConfig;
use http::AppState;
use registry::ServerRegistry;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let config = RelayConfig::from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let tokens = TokenStore::new();
    tokens.load(&config);
    if tokens.is_empty() {
        warn!("No tokens configured, every request will be rejected");
    }

    let registry = ServerRegistry::load(&config, &ClientConfig::default())
        .context("Failed to build server registry")?;

    info!("Relay starting");
    info!("  Config: {}", cli.config.display());
    info!("  Servers: {}", registry.len());
    info!("  Tokens: {}", tokens.len());

    let state = AppState {
        dispatcher: Dispatcher::new(Arc::new(registry), Arc::new(tokens)),
    };
    let app = http::create_router(state);

    let addr = format!("{}:{}", cli.bind, cli.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("HTTP listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
