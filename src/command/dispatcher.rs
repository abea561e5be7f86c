//! Dispatch orchestrator: authorize, resolve, delay, send, collect

use super::outcome::{DispatchError, Outcome, Payload};
use super::request::{CommandRequest, Target};
use crate::auth::TokenStore;
use crate::connection::{Backend, CommandReply};
use crate::registry::ServerRegistry;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Routes commands from HTTP callers to backends
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ServerRegistry>,
    tokens: Arc<TokenStore>,
}

impl Dispatcher {
    /// Create a dispatcher over an already loaded registry and token store
    pub fn new(registry: Arc<ServerRegistry>, tokens: Arc<TokenStore>) -> Self {
        Self { registry, tokens }
    }

    /// Reject missing or unknown tokens
    pub fn authorize(&self, token: Option<&str>) -> Result<(), DispatchError> {
        match token {
            Some(token) if self.tokens.is_valid(token) => Ok(()),
            _ => {
                debug!("Rejected request with an invalid token");
                Err(DispatchError::Unauthorized)
            }
        }
    }

    /// List every registered server
    pub fn list(&self, token: Option<&str>) -> Outcome {
        self.authorize(token)?;
        info!("Server listing requested");
        Ok(Payload::Servers(self.registry.summaries()))
    }

    /// Run one command request
    ///
    /// With `wait` unset the acknowledgment is returned before the delay starts;
    /// the dispatch then runs as a detached task and its result is only logged.
    pub async fn dispatch(&self, token: Option<&str>, request: CommandRequest) -> Outcome {
        self.authorize(token)?;

        let CommandRequest {
            target,
            command,
            delay,
            wait,
        } = request;

        match target {
            Target::Single { ip, port } => {
                let backend = self
                    .registry
                    .resolve(&ip, port)
                    .ok_or(DispatchError::NotFound)?;
                info!("{} @ {}ms $ {}", backend.key(), delay.as_millis(), command);

                if !wait {
                    tokio::spawn(async move {
                        let reply = send_one(backend, &command, delay).await;
                        if !reply.ok {
                            warn!("{}: no reply to detached command: {}", reply.server_key, command);
                        }
                    });
                    return Ok(Payload::Accepted);
                }

                send_one(backend, &command, delay)
                    .await
                    .payload
                    .map(Payload::Reply)
                    .ok_or(DispatchError::NullResponse)
            }

            Target::All => {
                if command.is_empty() {
                    return Err(DispatchError::Validation("Command field is required".into()));
                }

                let backends = self.registry.all().to_vec();
                info!(
                    "Sending to {} servers @ {}ms $ {}",
                    backends.len(),
                    delay.as_millis(),
                    command
                );

                if !wait {
                    tokio::spawn(async move {
                        let replies = broadcast(&backends, &command, delay).await;
                        let missing = replies.iter().filter(|r| !r.ok).count();
                        if missing > 0 {
                            warn!(
                                "{} of {} servers did not reply to detached broadcast: {}",
                                missing,
                                replies.len(),
                                command
                            );
                        }
                    });
                    return Ok(Payload::Accepted);
                }

                let replies = broadcast(&backends, &command, delay)
                    .await
                    .into_iter()
                    .map(|reply| (reply.server_key, reply.payload))
                    .collect::<BTreeMap<_, _>>();

                Ok(Payload::Replies(replies))
            }
        }
    }
}

async fn send_one(backend: Arc<dyn Backend>, command: &str, delay: Duration) -> CommandReply {
    pause(delay).await;
    backend.execute(command).await
}

/// Sleep for the requested delay; a zero delay sends right away
async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Fan out to every backend and wait until each one has settled
async fn broadcast(
    backends: &[Arc<dyn Backend>],
    command: &str,
    delay: Duration,
) -> Vec<CommandReply> {
    pause(delay).await;
    join_all(backends.iter().map(|backend| backend.execute(command))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use tokio::time::Instant;

    const TOKEN: &str = "valid-token";

    fn dispatcher(backends: Vec<Arc<dyn Backend>>) -> Dispatcher {
        let registry = ServerRegistry::from_backends(backends).unwrap();
        let tokens: TokenStore = [TOKEN].into_iter().collect();
        Dispatcher::new(Arc::new(registry), Arc::new(tokens))
    }

    fn single(ip: &str, port: u16, command: &str, wait: bool) -> CommandRequest {
        CommandRequest {
            target: Target::Single {
                ip: ip.into(),
                port: Some(port),
            },
            command: command.into(),
            delay: Duration::ZERO,
            wait,
        }
    }

    fn all(command: &str, wait: bool) -> CommandRequest {
        CommandRequest {
            target: Target::All,
            command: command.into(),
            delay: Duration::ZERO,
            wait,
        }
    }

    /// Let any detached task that was wrongly spawned reach its backend
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    /// Wait for a detached dispatch to reach `backend`
    async fn delivered(backend: &FakeBackend, count: usize) {
        tokio::time::timeout(Duration::from_secs(1), backend.wait_for_calls(count))
            .await
            .expect("detached command was never delivered");
    }

    #[tokio::test]
    async fn test_invalid_token_never_dispatches() {
        let backend = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "pong"));
        let d = dispatcher(vec![backend.clone() as Arc<dyn Backend>]);

        for token in [None, Some(""), Some("wrong"), Some("valid-token ")] {
            assert_eq!(d.list(token), Err(DispatchError::Unauthorized));
            for wait in [true, false] {
                assert_eq!(
                    d.dispatch(token, single("10.0.0.1", 27015, "ping", wait)).await,
                    Err(DispatchError::Unauthorized)
                );
                assert_eq!(
                    d.dispatch(token, all("ping", wait)).await,
                    Err(DispatchError::Unauthorized)
                );
            }
        }

        settle().await;
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_server_is_not_found() {
        let other = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "pong"));
        let d = dispatcher(vec![other.clone() as Arc<dyn Backend>]);

        for wait in [true, false] {
            let outcome = d
                .dispatch(Some(TOKEN), single("10.0.0.1", 27016, "ping", wait))
                .await;
            assert_eq!(outcome, Err(DispatchError::NotFound));
        }

        settle().await;
        assert_eq!(other.calls(), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_reply() {
        let backend = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "pong"));
        let d = dispatcher(vec![backend.clone() as Arc<dyn Backend>]);

        let outcome = d
            .dispatch(Some(TOKEN), single("10.0.0.1", 27015, "ping", true))
            .await;

        assert_eq!(outcome, Ok(Payload::Reply("pong".into())));
        assert_eq!(backend.commands(), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_wait_with_absent_reply_is_null_response() {
        let d = dispatcher(vec![FakeBackend::absent("10.0.0.1", 27015).shared()]);

        let outcome = d
            .dispatch(Some(TOKEN), single("10.0.0.1", 27015, "ping", true))
            .await;
        assert_eq!(outcome, Err(DispatchError::NullResponse));
    }

    #[tokio::test]
    async fn test_fire_and_forget_acks_even_if_backend_hangs() {
        let backend = Arc::new(FakeBackend::hanging("10.0.0.1", 27015));
        let d = dispatcher(vec![backend.clone() as Arc<dyn Backend>]);

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            d.dispatch(Some(TOKEN), single("10.0.0.1", 27015, "ping", false)),
        )
        .await
        .expect("ack must not wait for the backend");

        assert_eq!(outcome, Ok(Payload::Accepted));

        // The detached task still delivers the command
        delivered(&backend, 1).await;
        assert_eq!(backend.commands(), vec!["ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_acks_before_delay() {
        let backend = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "pong"));
        let d = dispatcher(vec![backend.clone() as Arc<dyn Backend>]);

        let mut request = single("10.0.0.1", 27015, "ping", false);
        request.delay = Duration::from_millis(500);

        let started = Instant::now();
        assert_eq!(d.dispatch(Some(TOKEN), request).await, Ok(Payload::Accepted));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(backend.calls(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.calls(), 1);
        assert!(backend.received_at()[0] - started >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_honoured_before_delivery() {
        let backend = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "pong"));
        let d = dispatcher(vec![backend.clone() as Arc<dyn Backend>]);

        let mut request = single("10.0.0.1", 27015, "ping", true);
        request.delay = Duration::from_millis(500);

        let started = Instant::now();
        let outcome = d.dispatch(Some(TOKEN), request).await;

        assert_eq!(outcome, Ok(Payload::Reply("pong".into())));
        assert!(backend.received_at()[0] - started >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_isolates_unreachable_backend() {
        let timeout = Duration::from_secs(5);
        let d = dispatcher(vec![
            FakeBackend::replying("10.0.0.1", 27015, "pong-1").shared(),
            FakeBackend::timing_out("10.0.0.2", 27015, timeout).shared(),
            FakeBackend::slow("10.0.0.3", 27015, Duration::from_millis(200), "pong-3").shared(),
        ]);

        let started = Instant::now();
        let outcome = d.dispatch(Some(TOKEN), all("ping", true)).await;

        let mut expected = BTreeMap::new();
        expected.insert("10.0.0.1:27015".to_string(), Some("pong-1".to_string()));
        expected.insert("10.0.0.2:27015".to_string(), None);
        expected.insert("10.0.0.3:27015".to_string(), Some("pong-3".to_string()));
        assert_eq!(outcome, Ok(Payload::Replies(expected)));

        // Bounded by the slowest backend's own timeout, not their sum
        assert_eq!(started.elapsed(), timeout);
    }

    #[tokio::test]
    async fn test_broadcast_requires_command() {
        let backend = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "pong"));
        let d = dispatcher(vec![backend.clone() as Arc<dyn Backend>]);

        for wait in [true, false] {
            assert_eq!(
                d.dispatch(Some(TOKEN), all("", wait)).await,
                Err(DispatchError::Validation("Command field is required".into()))
            );
        }
        settle().await;
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_broadcast() {
        let d = dispatcher(Vec::new());

        assert_eq!(
            d.dispatch(Some(TOKEN), all("ping", true)).await,
            Ok(Payload::Replies(BTreeMap::new()))
        );
        assert_eq!(
            d.dispatch(Some(TOKEN), all("ping", false)).await,
            Ok(Payload::Accepted)
        );
    }

    #[tokio::test]
    async fn test_detached_broadcast_reaches_every_backend() {
        let first = Arc::new(FakeBackend::replying("10.0.0.1", 27015, "a"));
        let second = Arc::new(FakeBackend::absent("10.0.0.2", 27015));
        let d = dispatcher(vec![first.clone() as Arc<dyn Backend>, second.clone() as Arc<dyn Backend>]);

        assert_eq!(
            d.dispatch(Some(TOKEN), all("say hello", false)).await,
            Ok(Payload::Accepted)
        );

        delivered(&first, 1).await;
        delivered(&second, 1).await;
        assert_eq!(first.commands(), vec!["say hello"]);
        assert_eq!(second.commands(), vec!["say hello"]);
    }

    #[tokio::test]
    async fn test_list_is_stable_under_traffic() {
        let d = dispatcher(vec![
            FakeBackend::replying("10.0.0.1", 27015, "a").shared(),
            FakeBackend::replying("10.0.0.2", 27015, "b").shared(),
        ]);

        let first = d.list(Some(TOKEN));
        let sends = (0..20).map(|i| {
            let d = d.clone();
            let ip = if i % 2 == 0 { "10.0.0.1" } else { "10.0.0.2" };
            async move { d.dispatch(Some(TOKEN), single(ip, 27015, "ping", true)).await }
        });
        let (_, second) = tokio::join!(join_all(sends), async { d.list(Some(TOKEN)) });

        assert_eq!(first, second);
        assert_eq!(first, d.list(Some(TOKEN)));
        match first {
            Ok(Payload::Servers(servers)) => assert_eq!(servers.len(), 2),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
