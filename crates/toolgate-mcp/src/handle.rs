//! A connected tool server and the health rules it is judged by.

use crate::config::{ServerConfig, SupervisorConfig};
use crate::protocol::ServerInfo;
use crate::session::{Session, TransportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use toolgate_core::{GatewayError, GatewayResult, ToolSchema};
use tracing::info;

/// Lifecycle state of a tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Not started yet, or the first connect is in progress.
    Connecting,
    /// Handshake done; tools are registered.
    Ready,
    /// A call or ping failed; tools are withdrawn until it recovers.
    Degraded,
    /// The session is gone; only a reconnect brings it back.
    Closed,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Health::Connecting => "connecting",
            Health::Ready => "ready",
            Health::Degraded => "degraded",
            Health::Closed => "closed",
        })
    }
}

/// A connected tool server: its exclusively owned session plus the catalog it
/// advertised during the handshake.
///
/// Handles are immutable once built. A reconnect produces a new handle, so
/// holders of the old one can tell they are stale.
pub struct ServerHandle {
    name: String,
    order: usize,
    transport: String,
    session: Option<Session>,
    tools: Vec<ToolSchema>,
    server_info: Option<ServerInfo>,
    call_timeout: Duration,
}

impl ServerHandle {
    /// Open the session and run the handshake, bounded by the connect timeout.
    ///
    /// On any failure the partially opened session is released before the
    /// error is returned.
    pub async fn connect(
        config: &ServerConfig,
        order: usize,
        policy: &SupervisorConfig,
    ) -> GatewayResult<Self> {
        let timeout = policy.connect_timeout(config);

        let attempt = async {
            let session = Session::open(config).await?;
            match session.handshake(timeout).await {
                Ok(done) => Ok((session, done)),
                Err(e) => {
                    session.close().await;
                    Err(match e {
                        TransportError::Protocol(reason) => GatewayError::Protocol {
                            server: config.name.clone(),
                            reason,
                        },
                        other => GatewayError::Connection {
                            server: config.name.clone(),
                            reason: format!("handshake failed: {other}"),
                        },
                    })
                }
            }
        };

        // Dropping `attempt` on expiry drops the session, which kills the child.
        let (session, (init, tools)) = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| GatewayError::Connection {
                server: config.name.clone(),
                reason: format!("no handshake within {}ms", timeout.as_millis()),
            })??;

        info!(
            server = %config.name,
            protocol = %init.protocol_version,
            tools = tools.len(),
            "Tool server initialized"
        );

        Ok(Self {
            name: config.name.clone(),
            order,
            transport: config.transport.describe(),
            session: Some(session),
            tools,
            server_info: init.server_info,
            call_timeout: policy.call_timeout(config),
        })
    }

    /// A placeholder for a server that has no session (not started yet, or
    /// failed to connect).
    pub fn detached(config: &ServerConfig, order: usize, policy: &SupervisorConfig) -> Self {
        Self {
            name: config.name.clone(),
            order,
            transport: config.transport.describe(),
            session: None,
            tools: Vec::new(),
            server_info: None,
            call_timeout: policy.call_timeout(config),
        }
    }

    /// Configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the configured server list.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Transport description, e.g. `tcp:127.0.0.1:7000`.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// The catalog advertised during the handshake.
    pub fn tools(&self) -> &[ToolSchema] {
        &self.tools
    }

    /// Name and version the server reported, if any.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Bound applied to each call and ping.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// True while the underlying session is open.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    fn session(&self) -> Result<&Session, TransportError> {
        self.session
            .as_ref()
            .ok_or_else(|| TransportError::Closed("server is not connected".into()))
    }

    /// Invoke `tool` (the server-local name) within this server's call timeout.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.session()?
            .call_tool(tool, arguments, self.call_timeout)
            .await
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.session()?.ping(self.call_timeout).await
    }

    /// Release the session. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(session) = &self.session {
            session.close().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn offline(name: &str, order: usize, tools: Vec<ToolSchema>) -> Self {
        Self {
            name: name.to_string(),
            order,
            transport: "test".into(),
            session: None,
            tools,
            server_info: None,
            call_timeout: Duration::from_secs(1),
        }
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("transport", &self.transport)
            .field("tools", &self.tools.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Health bookkeeping for one configured server, owned by the supervisor.
#[derive(Debug, Clone)]
pub(crate) struct HealthRecord {
    pub health: Health,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub reconnect_count: usize,
}

/// A health change worth logging and acting on.
pub(crate) type Transition = (Health, Health);

impl HealthRecord {
    pub fn connecting() -> Self {
        Self {
            health: Health::Connecting,
            consecutive_failures: 0,
            last_error: None,
            connected_at: None,
            last_health_check: None,
            reconnect_count: 0,
        }
    }

    pub fn mark_ready(&mut self) -> Option<Transition> {
        let from = self.health;
        self.health = Health::Ready;
        self.consecutive_failures = 0;
        self.connected_at = Some(Utc::now());
        (from != Health::Ready).then_some((from, Health::Ready))
    }

    pub fn mark_closed(&mut self, reason: impl Into<String>) -> Option<Transition> {
        let from = self.health;
        self.health = Health::Closed;
        self.last_error = Some(reason.into());
        (from != Health::Closed).then_some((from, Health::Closed))
    }

    /// Degraded → Ready; a Ready server just has its failure streak reset.
    pub fn record_success(&mut self) -> Option<Transition> {
        match self.health {
            Health::Ready => {
                self.consecutive_failures = 0;
                None
            }
            Health::Degraded => {
                self.health = Health::Ready;
                self.consecutive_failures = 0;
                Some((Health::Degraded, Health::Ready))
            }
            Health::Connecting | Health::Closed => None,
        }
    }

    /// Ready → Degraded on the first failure; Degraded → Closed once the streak
    /// exceeds `max_failures`.
    pub fn record_failure(&mut self, reason: &str, max_failures: u32) -> Option<Transition> {
        match self.health {
            Health::Ready => {
                self.health = Health::Degraded;
                self.consecutive_failures = 1;
                self.last_error = Some(reason.to_string());
                Some((Health::Ready, Health::Degraded))
            }
            Health::Degraded => {
                self.consecutive_failures += 1;
                self.last_error = Some(reason.to_string());
                if self.consecutive_failures > max_failures {
                    self.health = Health::Closed;
                    Some((Health::Degraded, Health::Closed))
                } else {
                    None
                }
            }
            Health::Connecting | Health::Closed => None,
        }
    }
}
