//! Backend connection clients
//!
//! This module handles:
//! - Persistent RCON sessions with automatic reconnection and backoff
//! - Password authentication
//! - Correlating replies to commands by request id
//! - Bounding every command by the client's own response timeout

mod client;
mod error;
mod session;

pub use client::{Backend, ClientConfig, CommandReply, RconClient};
