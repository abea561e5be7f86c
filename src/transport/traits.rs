//! The seam between a backend's session loop and its socket
//!
//! A session loop only needs a byte stream it can split and close, plus a way
//! to dial again after a failure. Production clients dial TCP; tests hand the
//! loop in-memory duplex pipes driven by a scripted backend.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream to one RCON backend, owned by exactly one session loop
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the write side so the backend sees a clean disconnect
    async fn shutdown(&mut self) -> Result<()>;
}

/// Dials a backend's command port, once per (re)connection attempt
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    type Stream: TransportStream;

    /// Open a fresh stream. Errors are retried by the session loop with backoff.
    async fn connect(&self) -> Result<Self::Stream>;

    /// `ip:port` being dialed, for logging
    fn address(&self) -> &str;
}
