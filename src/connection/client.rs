//! RCON connection client: one per registered backend

use super::session;
use crate::config::BackendDescriptor;
use crate::transport::TransportConnector;
use async_trait::async_trait;
use parking_lot::Mutex;
use rcon_shared::{state_machine::SessionState, timing};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of one command sent to one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub server_key: String,
    pub ok: bool,
    pub payload: Option<String>,
}

impl CommandReply {
    /// The backend answered with `payload`
    pub fn answered(server_key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            ok: true,
            payload: Some(payload.into()),
        }
    }

    /// The backend did not answer
    pub fn absent(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            ok: false,
            payload: None,
        }
    }
}

/// A backend the orchestrator can send commands to
#[async_trait]
pub trait Backend: Send + Sync {
    /// Static description of the backend
    fn descriptor(&self) -> &BackendDescriptor;

    /// Registry key (`ip:port`)
    fn key(&self) -> &str;

    /// Begin establishing the persistent connection. Idempotent, never fails;
    /// connection problems only show up as absent replies.
    fn connect(&self);

    /// Send one command and wait for its reply, bounded by the client's own timeout
    async fn execute(&self, command: &str) -> CommandReply;
}

/// Timing configuration for a connection client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub response_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub fragment_settle: Duration,
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(timing::AUTH_TIMEOUT_MS),
            response_timeout: Duration::from_millis(timing::RESPONSE_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(timing::RECONNECT_DELAY_MS),
            max_reconnect_delay: Duration::from_millis(timing::MAX_RECONNECT_DELAY_MS),
            fragment_settle: Duration::from_millis(timing::FRAGMENT_SETTLE_MS),
            sweep_interval: Duration::from_millis(timing::SWEEP_INTERVAL_MS),
        }
    }
}

/// A command handed to the session loop
#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub command: String,
    pub reply: oneshot::Sender<String>,
}

/// Everything the session loop takes ownership of on `connect()`
struct SessionParts<C> {
    connector: C,
    request_rx: mpsc::Receiver<QueuedCommand>,
    state_tx: watch::Sender<SessionState>,
}

/// Persistent RCON client for one backend
pub struct RconClient<C: TransportConnector> {
    descriptor: BackendDescriptor,
    key: String,
    config: ClientConfig,
    request_tx: mpsc::Sender<QueuedCommand>,
    state_rx: watch::Receiver<SessionState>,
    unstarted: Mutex<Option<SessionParts<C>>>,
}

impl<C: TransportConnector> RconClient<C> {
    /// Create a client. Nothing is dialed until `connect()` is called.
    pub fn new(descriptor: BackendDescriptor, connector: C, config: ClientConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(100);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        Self {
            key: descriptor.key(),
            descriptor,
            config,
            request_tx,
            state_rx,
            unstarted: Mutex::new(Some(SessionParts {
                connector,
                request_rx,
                state_tx,
            })),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Wait until the session reaches `target`. Returns false if the session loop ended.
    #[cfg(test)]
    pub async fn wait_for_state(&self, target: SessionState) -> bool {
        let mut state_rx = self.state_rx.clone();
        let reached = state_rx.wait_for(|state| *state == target).await.is_ok();
        reached
    }
}

#[async_trait]
impl<C: TransportConnector> Backend for RconClient<C> {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn connect(&self) {
        let Some(parts) = self.unstarted.lock().take() else {
            return;
        };

        tokio::spawn(session::run(
            self.key.clone(),
            self.descriptor.password.clone(),
            parts.connector,
            self.config.clone(),
            parts.request_rx,
            parts.state_tx,
        ));
    }

    async fn execute(&self, command: &str) -> CommandReply {
        let state = self.state();
        if !state.accepts_commands() {
            debug!("{}: not ready ({}), command not sent", self.key, state);
            return CommandReply::absent(&self.key);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = QueuedCommand {
            command: command.to_string(),
            reply: reply_tx,
        };

        let exchange = async {
            self.request_tx.send(request).await.ok()?;
            reply_rx.await.ok()
        };

        match timeout(self.config.response_timeout, exchange).await {
            Ok(Some(payload)) => CommandReply::answered(&self.key, payload),
            Ok(None) => {
                debug!("{}: session dropped the command", self.key);
                CommandReply::absent(&self.key)
            }
            Err(_) => {
                warn!(
                    "{}: no reply within {:?}",
                    self.key, self.config.response_timeout
                );
                CommandReply::absent(&self.key)
            }
        }
    }
}
