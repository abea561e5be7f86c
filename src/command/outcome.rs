//! Tagged dispatch outcome and the JSON envelope it serializes to

use crate::registry::ServerSummary;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Successful result of one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Fire-and-forget acknowledgment, serialized as `true`
    Accepted,
    /// Reply of a single backend
    Reply(String),
    /// Broadcast replies: server key -> reply, `null` for backends that did not answer
    Replies(BTreeMap<String, Option<String>>),
    /// Server listing
    Servers(Vec<ServerSummary>),
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Accepted => serializer.serialize_bool(true),
            Payload::Reply(reply) => reply.serialize(serializer),
            Payload::Replies(replies) => replies.serialize(serializer),
            Payload::Servers(servers) => servers.serialize(serializer),
        }
    }
}

/// Failed result of one endpoint. Always delivered inside a normal envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Invalid token")]
    Unauthorized,

    #[error("Server could not be found!")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("Null response")]
    NullResponse,
}

pub type Outcome = Result<Payload, DispatchError>;

/// Wire shape shared by every endpoint:
/// `{"success": true, "response": ...}` or `{"success": false, "error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Outcome> for Envelope {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(payload) => Self {
                success: true,
                response: Some(payload),
                error: None,
            },
            Err(e) => Self {
                success: false,
                response: None,
                error: Some(e.to_string()),
            },
        }
    }
}
