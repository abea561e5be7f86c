//! Endpoint handlers: query string in, envelope out

use super::AppState;
use crate::command::{normalize_delay, parse_port, CommandRequest, Envelope, Target};
use axum::{
    extract::{Query, State},
    response::Json,
};

/// Raw query pairs in arrival order
///
/// Extracted as a list rather than a struct so that repeated keys never turn
/// into an extractor rejection; every request reaches the dispatcher.
#[derive(Debug, Default)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    /// First value given for `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The value of `key` when it is given exactly once
    pub fn single(&self, key: &str) -> Option<&str> {
        let mut values = self.0.iter().filter(|(k, _)| k == key);
        match (values.next(), values.next()) {
            (Some((_, v)), None) => Some(v.as_str()),
            _ => None,
        }
    }

    /// A repeated token is never valid
    pub fn token(&self) -> Option<&str> {
        self.single("token")
    }

    /// `wait` counts only when it carries a value, so `wait=` means fire-and-forget
    pub fn wants_reply(&self) -> bool {
        self.first("wait").is_some_and(|w| !w.is_empty())
    }

    fn command(&self) -> String {
        self.first("command").unwrap_or_default().to_string()
    }
}

impl From<Vec<(String, String)>> for QueryParams {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Json<Envelope> {
    let params = QueryParams::from(pairs);
    Json(state.dispatcher.list(params.token()).into())
}

pub async fn send(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Json<Envelope> {
    let params = QueryParams::from(pairs);
    let request = CommandRequest {
        target: Target::Single {
            ip: params.first("ip").unwrap_or_default().to_string(),
            port: parse_port(params.first("port")),
        },
        command: params.command(),
        delay: normalize_delay(params.first("delay")),
        wait: params.wants_reply(),
    };

    let outcome = state.dispatcher.dispatch(params.token(), request).await;
    Json(outcome.into())
}

pub async fn send_all(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Json<Envelope> {
    let params = QueryParams::from(pairs);
    let request = CommandRequest {
        target: Target::All,
        command: params.command(),
        delay: normalize_delay(params.first("delay")),
        wait: params.wants_reply(),
    };

    let outcome = state.dispatcher.dispatch(params.token(), request).await;
    Json(outcome.into())
}
