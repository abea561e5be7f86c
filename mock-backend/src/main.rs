mod session;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Local RCON endpoint for end-to-end runs against the relay
#[derive(Debug, Parser)]
#[command(name = "mock-backend", version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "MOCK_RCON_BIND", default_value = "127.0.0.1:27015")]
    bind: String,

    /// Password clients must authenticate with
    #[arg(long, env = "MOCK_RCON_PASSWORD", default_value = "changeme")]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let password: Arc<str> = args.password.into();

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", args.bind))?;
    info!("Mock RCON backend listening on {}", args.bind);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        let password = password.clone();
        tokio::spawn(async move {
            match session::run(socket, &password).await {
                Ok(()) => info!("Client disconnected: {}", addr),
                Err(e) => warn!("Session with {} ended: {}", addr, e),
            }
        });
    }
}
