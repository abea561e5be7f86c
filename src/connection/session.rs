//! Session loop for one backend: connect, authenticate, serve, reconnect

use super::client::{ClientConfig, QueuedCommand};
use super::error::ConnectionError;
use crate::transport::{TransportConnector, TransportStream};
use rcon_shared::{
    codec::{self, FrameDecoder, MAX_FRAGMENT_BODY},
    packet_type,
    state_machine::{SessionEvent, SessionState, SessionStateMachine, TransitionResult},
    Packet,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Request id used for the password handshake. Command ids start at 1.
const AUTH_REQUEST_ID: i32 = 0;

/// Tracks the session state and publishes every change to the client
struct SessionTracker {
    key: String,
    fsm: SessionStateMachine,
    state_tx: watch::Sender<SessionState>,
}

impl SessionTracker {
    fn apply(&mut self, event: SessionEvent) {
        match self.fsm.process_event(event) {
            TransitionResult::Success(state) => {
                let previous = self.state_tx.send_replace(state);
                if previous != state {
                    debug!("{}: {} -> {}", self.key, previous, state);
                }
            }
            TransitionResult::Invalid { from, event } => {
                warn!("{}: ignoring {:?} while {}", self.key, event, from);
            }
        }
    }
}

/// Main session loop with reconnection logic
///
/// Returns once the owning client is dropped and the request channel closes.
pub(crate) async fn run<C: TransportConnector>(
    key: String,
    password: String,
    connector: C,
    config: ClientConfig,
    mut request_rx: mpsc::Receiver<QueuedCommand>,
    state_tx: watch::Sender<SessionState>,
) {
    let mut tracker = SessionTracker {
        key,
        fsm: SessionStateMachine::new(),
        state_tx,
    };

    loop {
        tracker.apply(SessionEvent::ConnectStarted);
        debug!("{}: connecting to {}", tracker.key, connector.address());

        let result = match timeout(config.connect_timeout, connector.connect()).await {
            Ok(Ok(stream)) => {
                tracker.apply(SessionEvent::Connected);
                serve(stream, &password, &config, &mut request_rx, &mut tracker).await
            }
            Ok(Err(e)) => {
                tracker.apply(SessionEvent::ConnectFailed);
                Err(ConnectionError::Connect(format!("{:#}", e)))
            }
            Err(_) => {
                tracker.apply(SessionEvent::ConnectFailed);
                Err(ConnectionError::Timeout("connect"))
            }
        };

        match result {
            Ok(()) => {
                info!("{}: client dropped, session closed", tracker.key);
                return;
            }
            Err(e) => warn!("{}: {}", tracker.key, e),
        }

        let delay = tracker
            .fsm
            .backoff(config.reconnect_delay, config.max_reconnect_delay);
        debug!("{}: reconnecting in {:?}", tracker.key, delay);

        if !idle_until(delay, &mut request_rx, &tracker.key).await {
            info!("{}: client dropped while disconnected", tracker.key);
            return;
        }
    }
}

/// Wait out the backoff delay. Commands arriving meanwhile are dropped so
/// their callers resolve immediately. Returns false if the channel closed.
async fn idle_until(
    delay: Duration,
    request_rx: &mut mpsc::Receiver<QueuedCommand>,
    key: &str,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            request = request_rx.recv() => match request {
                Some(request) => {
                    debug!("{}: dropping command while disconnected: {}", key, request.command);
                }
                None => return false,
            },
        }
    }
}

/// Authenticate and then serve commands until the socket fails or the client goes away
async fn serve<S: TransportStream>(
    mut stream: S,
    password: &str,
    config: &ClientConfig,
    request_rx: &mut mpsc::Receiver<QueuedCommand>,
    tracker: &mut SessionTracker,
) -> Result<(), ConnectionError> {
    let mut decoder = FrameDecoder::new();

    match timeout(
        config.auth_timeout,
        authenticate(&mut stream, &mut decoder, password),
    )
    .await
    {
        Ok(Ok(())) => tracker.apply(SessionEvent::Authenticated),
        Ok(Err(ConnectionError::AuthRejected)) => {
            tracker.apply(SessionEvent::AuthRejected);
            return Err(ConnectionError::AuthRejected);
        }
        Ok(Err(e)) => {
            tracker.apply(SessionEvent::ConnectionLost);
            return Err(e);
        }
        Err(_) => {
            tracker.apply(SessionEvent::ConnectionLost);
            return Err(ConnectionError::Timeout("authentication"));
        }
    }

    info!("{}: authenticated", tracker.key);

    let result = handle_connection(stream, decoder, config, request_rx, &tracker.key).await;
    if result.is_err() {
        tracker.apply(SessionEvent::ConnectionLost);
    }
    result
}

/// Send the password and wait for the backend's verdict
async fn authenticate<S: TransportStream>(
    stream: &mut S,
    decoder: &mut FrameDecoder,
    password: &str,
) -> Result<(), ConnectionError> {
    let encoded = codec::encode(&Packet::auth(AUTH_REQUEST_ID, password))?;
    stream.write_all(&encoded).await?;

    let mut read_buf = vec![0u8; 4096];

    loop {
        // Source servers send an empty response value ahead of the auth response
        while let Some(packet) = decoder.decode_next()? {
            if packet.kind != packet_type::SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.is_auth_failure() {
                return Err(ConnectionError::AuthRejected);
            }
            return Ok(());
        }

        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        decoder.extend(&read_buf[..n]);
    }
}

/// Handle an authenticated connection
async fn handle_connection<S: TransportStream>(
    stream: S,
    mut decoder: FrameDecoder,
    config: &ClientConfig,
    request_rx: &mut mpsc::Receiver<QueuedCommand>,
    key: &str,
) -> Result<(), ConnectionError> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut read_buf = vec![0u8; 4096];
    let mut pending = PendingTable::default();
    let mut ids = RequestIds::default();

    let mut sweep = interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Anything that arrived together with the auth response
    pending.route_all(&mut decoder, key)?;

    loop {
        tokio::select! {
            _ = sweep.tick() => {
                pending.sweep(Instant::now(), config.response_timeout, config.fragment_settle);
            }

            request = request_rx.recv() => {
                let Some(request) = request else {
                    let mut stream = reader.unsplit(writer);
                    if let Err(e) = TransportStream::shutdown(&mut stream).await {
                        debug!("{}: shutdown failed: {}", key, e);
                    }
                    return Ok(());
                };

                if request.reply.is_closed() {
                    continue;
                }

                let id = ids.next();
                let encoded = match codec::encode(&Packet::exec(id, request.command.as_str())) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        // Dropping the waiter reports the command as unanswered
                        warn!("{}: cannot send command: {}", key, e);
                        continue;
                    }
                };

                writer.write_all(&encoded).await?;
                pending.insert(id, request.reply);
            }

            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Err(ConnectionError::Closed);
                }
                decoder.extend(&read_buf[..n]);
                pending.route_all(&mut decoder, key)?;
            }
        }
    }
}

/// Wrapping sequence of positive request ids
#[derive(Debug, Default)]
struct RequestIds(i32);

impl RequestIds {
    fn next(&mut self) -> i32 {
        self.0 = if self.0 == i32::MAX { 1 } else { self.0 + 1 };
        self.0
    }
}

/// A command sent to the backend whose reply is still being collected
#[derive(Debug)]
struct PendingReply {
    reply: oneshot::Sender<String>,
    body: Vec<u8>,
    sent_at: Instant,
    last_fragment_at: Option<Instant>,
}

impl PendingReply {
    /// Hand the reassembled body to the waiter, which may have timed out already
    fn complete(self) {
        let _ = self
            .reply
            .send(String::from_utf8_lossy(&self.body).into_owned());
    }
}

/// Commands awaiting replies, keyed by request id
#[derive(Debug, Default)]
struct PendingTable {
    entries: HashMap<i32, PendingReply>,
}

impl PendingTable {
    fn insert(&mut self, id: i32, reply: oneshot::Sender<String>) {
        self.entries.insert(
            id,
            PendingReply {
                reply,
                body: Vec::new(),
                sent_at: Instant::now(),
                last_fragment_at: None,
            },
        );
    }

    fn route_all(
        &mut self,
        decoder: &mut FrameDecoder,
        key: &str,
    ) -> Result<(), ConnectionError> {
        while let Some(packet) = decoder.decode_next()? {
            self.route(packet, key);
        }
        Ok(())
    }

    /// Attach a response packet to its command
    fn route(&mut self, packet: Packet, key: &str) {
        if packet.kind != packet_type::SERVERDATA_RESPONSE_VALUE {
            debug!("{}: ignoring packet type {} (id={})", key, packet.kind, packet.id);
            return;
        }

        let Some(entry) = self.entries.get_mut(&packet.id) else {
            debug!("{}: reply for unknown request {}", key, packet.id);
            return;
        };

        let full_fragment = packet.body.len() >= MAX_FRAGMENT_BODY;
        entry.body.extend_from_slice(&packet.body);

        if full_fragment {
            entry.last_fragment_at = Some(Instant::now());
        } else if let Some(entry) = self.entries.remove(&packet.id) {
            entry.complete();
        }
    }

    /// Complete settled multi-packet replies and evict abandoned entries
    fn sweep(&mut self, now: Instant, response_timeout: Duration, settle: Duration) {
        let settled: Vec<i32> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.last_fragment_at
                    .is_some_and(|at| now.duration_since(at) >= settle)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in settled {
            if let Some(entry) = self.entries.remove(&id) {
                entry.complete();
            }
        }

        self.entries.retain(|_, e| {
            !e.reply.is_closed() && now.duration_since(e.sent_at) < response_timeout
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}
