//! rcon-relay Shared Protocol Types
//!
//! This crate provides the RCON packet types, the length-prefixed codec and the
//! session state machine shared by the relay and the mock backend.

pub mod codec;
pub mod state_machine;

use bytes::Bytes;
use std::borrow::Cow;

/// Packet type values of the Source RCON protocol
///
/// `SERVERDATA_EXECCOMMAND` and `SERVERDATA_AUTH_RESPONSE` share a value; the
/// direction of the packet tells them apart.
pub mod packet_type {
    pub const SERVERDATA_AUTH: i32 = 3;
    pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
    pub const SERVERDATA_EXECCOMMAND: i32 = 2;
    pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;
}

/// Request id a backend answers with when authentication fails
pub const AUTH_FAILED_ID: i32 = -1;

/// Timing parameters for backend sessions
pub mod timing {
    /// Connect timeout in milliseconds
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Authentication handshake timeout in milliseconds
    pub const AUTH_TIMEOUT_MS: u64 = 5000;

    /// How long a command waits for its reply before it is reported as absent
    pub const RESPONSE_TIMEOUT_MS: u64 = 5000;

    /// Initial reconnection delay
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Upper bound for the exponential reconnection backoff
    pub const MAX_RECONNECT_DELAY_MS: u64 = 30000;

    /// Quiet period after a full-size fragment before the reply is considered complete
    pub const FRAGMENT_SETTLE_MS: u64 = 200;

    /// Interval of the pending-request sweep
    pub const SWEEP_INTERVAL_MS: u64 = 100;
}

/// A single RCON packet
///
/// The body is kept as raw bytes: a multi-packet reply may split a UTF-8
/// sequence across two fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(id: i32, kind: i32, body: impl AsRef<[u8]>) -> Self {
        Self {
            id,
            kind,
            body: Bytes::copy_from_slice(body.as_ref()),
        }
    }

    /// Authentication request carrying the backend password
    pub fn auth(id: i32, password: impl AsRef<[u8]>) -> Self {
        Self::new(id, packet_type::SERVERDATA_AUTH, password)
    }

    /// Command execution request
    pub fn exec(id: i32, command: impl AsRef<[u8]>) -> Self {
        Self::new(id, packet_type::SERVERDATA_EXECCOMMAND, command)
    }

    /// Command response (used by backends)
    pub fn response(id: i32, body: impl AsRef<[u8]>) -> Self {
        Self::new(id, packet_type::SERVERDATA_RESPONSE_VALUE, body)
    }

    /// Authentication response (used by backends)
    pub fn auth_response(id: i32) -> Self {
        Self::new(id, packet_type::SERVERDATA_AUTH_RESPONSE, "")
    }

    /// Value of the size field for this packet
    pub fn wire_size(&self) -> usize {
        // id + type + body + two NUL terminators
        4 + 4 + self.body.len() + 2
    }

    /// Body as text, with invalid UTF-8 replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// True for an authentication response that rejects the password
    pub fn is_auth_failure(&self) -> bool {
        self.kind == packet_type::SERVERDATA_AUTH_RESPONSE && self.id == AUTH_FAILED_ID
    }
}
