//! Scripted backends for orchestrator and HTTP tests

use crate::config::BackendDescriptor;
use crate::connection::{Backend, CommandReply};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Behavior {
    Reply(String),
    Absent,
    /// Gives up after the delay, like a client hitting its response timeout
    TimesOut(Duration),
    Slow(Duration, String),
    Hang,
}

/// A backend whose answers are fixed up front and whose invocations are recorded
pub struct FakeBackend {
    descriptor: BackendDescriptor,
    key: String,
    behavior: Behavior,
    commands: Mutex<Vec<(String, Instant)>>,
    received: Notify,
}

impl FakeBackend {
    fn with_behavior(ip: &str, port: u16, behavior: Behavior) -> Self {
        let descriptor = BackendDescriptor {
            hostname: format!("host-{}", ip),
            name: format!("Server {}:{}", ip, port),
            ip: ip.to_string(),
            port,
            receiver_port: None,
            password: "secret".to_string(),
        };
        Self {
            key: descriptor.key(),
            descriptor,
            behavior,
            commands: Mutex::new(Vec::new()),
            received: Notify::new(),
        }
    }

    pub fn replying(ip: &str, port: u16, payload: &str) -> Self {
        Self::with_behavior(ip, port, Behavior::Reply(payload.to_string()))
    }

    pub fn absent(ip: &str, port: u16) -> Self {
        Self::with_behavior(ip, port, Behavior::Absent)
    }

    pub fn timing_out(ip: &str, port: u16, after: Duration) -> Self {
        Self::with_behavior(ip, port, Behavior::TimesOut(after))
    }

    pub fn slow(ip: &str, port: u16, after: Duration, payload: &str) -> Self {
        Self::with_behavior(ip, port, Behavior::Slow(after, payload.to_string()))
    }

    pub fn hanging(ip: &str, port: u16) -> Self {
        Self::with_behavior(ip, port, Behavior::Hang)
    }

    pub fn shared(self) -> Arc<dyn Backend> {
        Arc::new(self)
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    /// When each command was received
    pub fn received_at(&self) -> Vec<Instant> {
        self.commands.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn calls(&self) -> usize {
        self.commands.lock().len()
    }

    /// Resolve once at least `count` commands have arrived
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let received = self.received.notified();
            if self.calls() >= count {
                return;
            }
            received.await;
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn connect(&self) {}

    async fn execute(&self, command: &str) -> CommandReply {
        self.commands
            .lock()
            .push((command.to_string(), Instant::now()));
        self.received.notify_waiters();

        match &self.behavior {
            Behavior::Reply(payload) => CommandReply::answered(&self.key, payload.clone()),
            Behavior::Absent => CommandReply::absent(&self.key),
            Behavior::TimesOut(after) => {
                tokio::time::sleep(*after).await;
                CommandReply::absent(&self.key)
            }
            Behavior::Slow(after, payload) => {
                tokio::time::sleep(*after).await;
                CommandReply::answered(&self.key, payload.clone())
            }
            Behavior::Hang => std::future::pending().await,
        }
    }
}
