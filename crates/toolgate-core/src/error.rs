//! Gateway error type and its stable classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A convenience `Result` alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Top-level error type for the gateway.
///
/// Server-level variants (`Connection`, `Protocol`, `Timeout`,
/// `ServerUnavailable`) are normally contained by the supervisor and the
/// dispatcher and turned into health transitions or tool results. Only the
/// request-level variants are expected to reach the front door.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A tool server could not be reached or failed its handshake.
    #[error("Connection error for server '{server}': {reason}")]
    Connection {
        /// Server name.
        server: String,
        /// What failed.
        reason: String,
    },

    /// A tool server sent a frame that is not valid JSON-RPC.
    #[error("Protocol error for server '{server}': {reason}")]
    Protocol {
        /// Server name.
        server: String,
        /// What was wrong with the frame.
        reason: String,
    },

    /// A tool invocation did not complete within its bound.
    #[error("Tool '{tool}' on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Public tool name.
        tool: String,
        /// Owning server.
        server: String,
        /// The bound that expired.
        timeout_ms: u64,
    },

    /// The server owning a tool is not usable right now.
    #[error("Server '{server}' unavailable: {reason}")]
    ServerUnavailable {
        /// Server name, or `*` when no server is usable.
        server: String,
        /// Why it cannot serve the call.
        reason: String,
    },

    /// No tool with this public name is registered.
    #[error("Unknown tool: '{0}'")]
    NotFound(String),

    /// Tool arguments did not match the tool's parameter schema.
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        /// Public tool name.
        tool: String,
        /// First schema violation.
        reason: String,
    },

    /// The conversational model could not produce a reply.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The conversation hit its configured turn limit.
    #[error("Conversation exceeded the maximum of {max_turns} turns")]
    TurnLimitExceeded {
        /// The configured limit.
        max_turns: u32,
    },

    /// The per-request deadline expired.
    #[error("Conversation deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded {
        /// The configured deadline.
        deadline_ms: u64,
    },

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable classification of a [`GatewayError`], used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`GatewayError::Connection`].
    Connection,
    /// See [`GatewayError::Protocol`].
    Protocol,
    /// See [`GatewayError::Timeout`].
    Timeout,
    /// See [`GatewayError::ServerUnavailable`].
    ServerUnavailable,
    /// See [`GatewayError::NotFound`].
    NotFound,
    /// See [`GatewayError::InvalidArguments`].
    InvalidArguments,
    /// See [`GatewayError::ModelUnavailable`].
    ModelUnavailable,
    /// See [`GatewayError::TurnLimitExceeded`].
    TurnLimitExceeded,
    /// See [`GatewayError::DeadlineExceeded`].
    DeadlineExceeded,
    /// See [`GatewayError::Config`].
    Config,
    /// Invariant violations and anything without a dedicated kind.
    InternalError,
}

impl ErrorKind {
    /// The snake_case name used in serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerUnavailable => "server_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::TurnLimitExceeded => "turn_limit_exceeded",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Config => "config",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection { .. } => ErrorKind::Connection,
            GatewayError::Protocol { .. } => ErrorKind::Protocol,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::ServerUnavailable { .. } => ErrorKind::ServerUnavailable,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            GatewayError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            GatewayError::TurnLimitExceeded { .. } => ErrorKind::TurnLimitExceeded,
            GatewayError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            GatewayError::Config(_) => ErrorKind::Config,
            GatewayError::Internal(_) | GatewayError::Json(_) | GatewayError::Io(_) => {
                ErrorKind::InternalError
            }
        }
    }

    /// The kind reported to a chat client.
    ///
    /// Collapses server-level kinds into `ServerUnavailable` and anything the
    /// front door has no dedicated answer for into `InternalError`, so callers
    /// only ever see one of the request-level kinds.
    pub fn public_kind(&self) -> ErrorKind {
        match self.kind() {
            ErrorKind::Connection | ErrorKind::Protocol | ErrorKind::ServerUnavailable => {
                ErrorKind::ServerUnavailable
            }
            kind @ (ErrorKind::ModelUnavailable
            | ErrorKind::TurnLimitExceeded
            | ErrorKind::DeadlineExceeded) => kind,
            _ => ErrorKind::InternalError,
        }
    }
}
