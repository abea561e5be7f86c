//! Server registry: every configured backend and its connection client

use crate::config::{ConfigError, RelayConfig};
use crate::connection::{Backend, ClientConfig, RconClient};
use crate::transport::TcpConnector;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Public view of a backend, as returned by `/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    pub hostname: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
}

/// Write-once map from `ip:port` to the backend's client
///
/// Built at startup and never modified afterwards, so reads need no locking.
pub struct ServerRegistry {
    /// Clients in configuration order
    backends: Vec<Arc<dyn Backend>>,
    /// Map of key -> index into `backends`
    index: HashMap<String, usize>,
}

impl ServerRegistry {
    /// Build the registry from configuration and start every client's connection
    ///
    /// Does not wait for any backend to become reachable.
    pub fn load(config: &RelayConfig, client_config: &ClientConfig) -> Result<Self, ConfigError> {
        let backends = config
            .servers
            .iter()
            .map(|descriptor| {
                let connector = TcpConnector::new(descriptor.key());
                Arc::new(RconClient::new(
                    descriptor.clone(),
                    connector,
                    client_config.clone(),
                )) as Arc<dyn Backend>
            })
            .collect();

        let registry = Self::from_backends(backends)?;

        for backend in &registry.backends {
            backend.connect();
        }
        info!("Registered {} servers", registry.len());

        Ok(registry)
    }

    /// Build a registry from existing clients, rejecting duplicate keys
    pub fn from_backends(backends: Vec<Arc<dyn Backend>>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(backends.len());

        for (position, backend) in backends.iter().enumerate() {
            if index.insert(backend.key().to_string(), position).is_some() {
                return Err(ConfigError::DuplicateServer(backend.key().to_string()));
            }
        }

        Ok(Self { backends, index })
    }

    /// Look up a backend by `ip`, or by `ip:port` when a port is given
    pub fn resolve(&self, ip: &str, port: Option<u16>) -> Option<Arc<dyn Backend>> {
        let position = match port {
            Some(port) => self.index.get(&format!("{}:{}", ip, port)),
            None => self.index.get(ip),
        }?;
        Some(self.backends[*position].clone())
    }

    /// Every backend in configuration order
    pub fn all(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// Public descriptions of every backend in configuration order
    pub fn summaries(&self) -> Vec<ServerSummary> {
        self.backends
            .iter()
            .map(|backend| {
                let descriptor = backend.descriptor();
                ServerSummary {
                    hostname: descriptor.hostname.clone(),
                    name: descriptor.name.clone(),
                    ip: descriptor.ip.clone(),
                    port: descriptor.port,
                }
            })
            .collect()
    }

    /// Number of registered backends
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
