//! Startup configuration: command-line flags and the server list file

use clap::Parser;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command-line flags, each with an environment fallback
#[derive(Debug, Clone, Parser)]
#[command(name = "rcon-relay", version, about = "HTTP control surface for a fleet of RCON servers")]
pub struct Cli {
    /// Path to the servers/tokens JSON file
    #[arg(long, env = "RELAY_CONFIG", default_value = "./config/servers.json")]
    pub config: PathBuf,

    /// HTTP listen port
    #[arg(long, env = "HTTP_PORT", default_value_t = 27300)]
    pub http_port: u16,

    /// HTTP bind address
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,
}

/// Errors raised while loading configuration. All of them abort startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Server #{index}: field `{field}` must not be empty")]
    EmptyField { index: usize, field: &'static str },

    #[error("Server #{index}: invalid {field} `{value}`")]
    InvalidPort {
        index: usize,
        field: &'static str,
        value: String,
    },

    #[error("Duplicate server address {0}")]
    DuplicateServer(String),
}

/// Identifies and addresses one remote server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub hostname: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub receiver_port: Option<u16>,
    pub password: String,
}

impl BackendDescriptor {
    /// Registry key: `ip:port`
    pub fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Parsed configuration file
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub tokens: Vec<String>,
    pub servers: Vec<BackendDescriptor>,
}

/// Ports show up both as numbers and as numeric strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(i64),
    Text(String),
}

impl PortValue {
    fn parse(&self) -> Option<u16> {
        match self {
            PortValue::Number(n) => u16::try_from(*n).ok(),
            PortValue::Text(s) => s.trim().parse().ok(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, PortValue::Text(s) if s.trim().is_empty())
    }

    fn raw(&self) -> String {
        match self {
            PortValue::Number(n) => n.to_string(),
            PortValue::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawServer {
    hostname: String,
    name: String,
    ip: String,
    port: PortValue,
    password: String,
    #[serde(rename = "receiverPort", default)]
    receiver_port: Option<PortValue>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    tokens: Vec<String>,
    servers: Vec<RawServer>,
}

impl RelayConfig {
    /// Read and validate a configuration file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a configuration document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(raw)?;

        let mut seen = HashSet::new();
        let mut servers = Vec::with_capacity(raw.servers.len());

        for (index, server) in raw.servers.into_iter().enumerate() {
            let ip = server.ip.trim().to_string();
            if ip.is_empty() {
                return Err(ConfigError::EmptyField { index, field: "ip" });
            }

            let port = server.port.parse().ok_or_else(|| ConfigError::InvalidPort {
                index,
                field: "port",
                value: server.port.raw(),
            })?;

            let receiver_port = match server.receiver_port {
                Some(ref value) if !value.is_blank() => {
                    Some(value.parse().ok_or_else(|| ConfigError::InvalidPort {
                        index,
                        field: "receiverPort",
                        value: value.raw(),
                    })?)
                }
                _ => None,
            };

            let descriptor = BackendDescriptor {
                hostname: server.hostname,
                name: server.name,
                ip,
                port,
                receiver_port,
                password: server.password,
            };

            if !seen.insert(descriptor.key()) {
                return Err(ConfigError::DuplicateServer(descriptor.key()));
            }
            servers.push(descriptor);
        }

        Ok(Self {
            tokens: raw.tokens,
            servers,
        })
    }
}
