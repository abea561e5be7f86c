//! Backend Session State Machine
//!
//! Defines valid session transitions and the reconnection backoff derived from them.

use std::time::Duration;

/// Lifecycle state of one backend session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No socket, waiting for the next connection attempt
    #[default]
    Disconnected,
    /// TCP connection in progress
    Connecting,
    /// Socket open, password sent
    Authenticating,
    /// Authenticated, commands are accepted
    Ready,
    /// Backend refused the password
    AuthRejected,
}

impl SessionState {
    /// Whether commands can be sent in this state
    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionState::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::AuthRejected => "auth-rejected",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connection attempt begins
    ConnectStarted,
    /// TCP connection established
    Connected,
    /// Connection attempt failed or timed out
    ConnectFailed,
    /// Backend accepted the password
    Authenticated,
    /// Backend refused the password
    AuthRejected,
    /// An established socket dropped
    ConnectionLost,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(SessionState),
    /// Transition was invalid from current state
    Invalid { from: SessionState, event: SessionEvent },
}

/// The session state machine for one backend connection
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    current_state: SessionState,
    consecutive_failures: u32,
}

impl SessionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.current_state
    }

    /// Number of failed attempts since the last successful authentication
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        match self.get_next_state(&event) {
            Some(state) => {
                match state {
                    SessionState::Ready => self.consecutive_failures = 0,
                    SessionState::Disconnected | SessionState::AuthRejected
                        if self.current_state != SessionState::Ready =>
                    {
                        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    }
                    _ => {}
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Delay before the next connection attempt
    ///
    /// Doubles per consecutive failure, capped at `max`. A dropped session that
    /// had authenticated retries after `initial`.
    pub fn backoff(&self, initial: Duration, max: Duration) -> Duration {
        let exponent = self.consecutive_failures.saturating_sub(1).min(16);
        std::cmp::min(initial.saturating_mul(1 << exponent), max)
    }

    fn get_next_state(&self, event: &SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self.current_state, event) {
            (Disconnected | SessionState::AuthRejected, ConnectStarted) => Some(Connecting),

            (Connecting, Connected) => Some(Authenticating),
            (Connecting, ConnectFailed) => Some(Disconnected),

            (Authenticating, Authenticated) => Some(Ready),
            (Authenticating, SessionEvent::AuthRejected) => Some(SessionState::AuthRejected),
            (Authenticating, ConnectionLost | ConnectFailed) => Some(Disconnected),

            (Ready, ConnectionLost) => Some(Disconnected),

            _ => None,
        }
    }
}
