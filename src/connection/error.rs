use rcon_shared::codec::CodecError;
use thiserror::Error;

/// Failures inside a backend session. They never leave the connection module:
/// callers of `execute` only see an absent reply.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Backend rejected the password")]
    AuthRejected,

    #[error("Backend closed the connection")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),
}
