//! Tool server and supervisor configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use toolgate_core::{GatewayError, GatewayResult};

/// Configuration for a single tool server.
///
/// The position of a server in the configured list is significant: it decides
/// which server keeps the bare name when two catalogs collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique identity, also used as the alias prefix for colliding tools.
    pub name: String,
    /// Where and how to reach it.
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// Overrides both the connect and the per-call timeout for this server.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Reconnect automatically after the server is closed (default: true).
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransportConfig {
    /// Spawn a child process and speak newline-delimited JSON over its stdio.
    Stdio {
        /// Program to run.
        command: String,
        /// Its arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment variables.
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory.
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    /// Connect to `host:port` and speak newline-delimited JSON over TCP.
    Tcp {
        /// `host:port`.
        address: String,
    },
}

impl TransportConfig {
    /// Short human-readable descriptor, e.g. `stdio:python` or `tcp:127.0.0.1:9000`.
    pub fn describe(&self) -> String {
        match self {
            TransportConfig::Stdio { command, .. } => format!("stdio:{command}"),
            TransportConfig::Tcp { address } => format!("tcp:{address}"),
        }
    }
}

impl ServerConfig {
    /// A stdio server with the given command line.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Stdio {
                command: command.into(),
                args: args.iter().map(ToString::to_string).collect(),
                env: HashMap::new(),
                cwd: None,
            },
            timeout_ms: None,
            auto_reconnect: true,
        }
    }

    /// A TCP server at `address`.
    pub fn tcp(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Tcp {
                address: address.into(),
            },
            timeout_ms: None,
            auto_reconnect: true,
        }
    }

    /// Builder-style per-server timeout override.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Builder-style toggle for automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}

/// Process-wide supervision and dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Default bound for a single tool invocation (default: 30000).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Default bound for connect + handshake at startup (default: 30000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Failures tolerated while Degraded before the server is closed (default: 1).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Health check interval in seconds (default: 60). Set to 0 to disable.
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    /// Connect attempts per reconnect cycle (default: 5).
    #[serde(default = "default_reconnect_retries")]
    pub reconnect_retries: u32,
    /// Separator between server name and tool name in collision aliases (default: ".").
    #[serde(default = "default_alias_separator")]
    pub alias_separator: String,
}

fn default_true() -> bool {
    true
}
fn default_call_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_max_consecutive_failures() -> u32 {
    1
}
fn default_health_interval() -> u64 {
    60
}
fn default_reconnect_retries() -> u32 {
    5
}
fn default_alias_separator() -> String {
    ".".to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            health_check_interval_secs: default_health_interval(),
            reconnect_retries: default_reconnect_retries(),
            alias_separator: default_alias_separator(),
        }
    }
}

impl SupervisorConfig {
    /// Invocation bound for `server`, honouring its override.
    pub fn call_timeout(&self, server: &ServerConfig) -> Duration {
        Duration::from_millis(server.timeout_ms.unwrap_or(self.call_timeout_ms))
    }

    /// Connect + handshake bound for `server`, honouring its override.
    pub fn connect_timeout(&self, server: &ServerConfig) -> Duration {
        Duration::from_millis(server.timeout_ms.unwrap_or(self.connect_timeout_ms))
    }

    /// Reject zero timeouts and an empty alias separator.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.call_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "supervisor timeouts must be greater than zero".into(),
            ));
        }
        if self.alias_separator.is_empty() {
            return Err(GatewayError::Config("alias_separator must not be empty".into()));
        }
        Ok(())
    }
}

/// Check an ordered server list: unique non-empty names, a usable transport
/// descriptor, and non-zero timeout overrides.
pub fn validate_servers(servers: &[ServerConfig]) -> GatewayResult<()> {
    let mut seen = HashSet::new();
    for server in servers {
        if server.name.trim().is_empty() {
            return Err(GatewayError::Config("server name must not be empty".into()));
        }
        if !seen.insert(server.name.as_str()) {
            return Err(GatewayError::Config(format!(
                "duplicate server name '{}'",
                server.name
            )));
        }
        match &server.transport {
            TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
                return Err(GatewayError::Config(format!(
                    "server '{}' has an empty command",
                    server.name
                )));
            }
            TransportConfig::Tcp { address } if address.trim().is_empty() => {
                return Err(GatewayError::Config(format!(
                    "server '{}' has an empty address",
                    server.name
                )));
            }
            _ => {}
        }
        if server.timeout_ms == Some(0) {
            return Err(GatewayError::Config(format!(
                "server '{}' has a zero timeout",
                server.name
            )));
        }
    }
    Ok(())
}
