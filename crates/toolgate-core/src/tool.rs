//! Tool schemas, invocations and typed results.

use crate::error::{ErrorKind, GatewayError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tool advertised by a tool server in its `tools/list` catalog.
///
/// The name is only unique within the owning server; the registry decides the
/// public name the model sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// What the tool does, shown to the model.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments object.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolSchema {
    /// Creates a schema with the given name, description and parameter schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Returns a copy of this schema published under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// A request from the model to invoke a tool by its public name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Correlation id, assigned by the model or generated locally.
    pub id: String,
    /// Public (registry) name of the tool.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    /// Creates an invocation with a freshly generated correlation id.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    /// Creates an invocation with an explicit correlation id.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Why a dispatch did not produce a tool payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// No tool with this public name is registered.
    NotFound,
    /// The arguments failed schema validation; the server was not contacted.
    InvalidArguments,
    /// The server did not answer within the invocation bound.
    Timeout,
    /// The owning server is not Ready or its session failed.
    ServerUnavailable,
    /// The server answered the call with a JSON-RPC error.
    Rejected,
}

/// Outcome of a single dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The server's `tools/call` result, unchanged.
    Success {
        /// The result object, `content` and `isError` included.
        payload: serde_json::Value,
    },
    /// A typed failure produced by the gateway.
    Failure {
        /// What went wrong.
        kind: ToolFailureKind,
        /// Description the model gets to read.
        message: String,
    },
}

/// The typed result of dispatching a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The id of the [`ToolInvocation`] this result corresponds to.
    pub call_id: String,
    /// Public name of the invoked tool.
    pub tool: String,
    /// Server that handled the call, when the name resolved to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Payload or typed failure.
    pub outcome: ToolOutcome,
    /// Wall-clock time spent in the dispatcher.
    pub elapsed_ms: u64,
}

impl ToolResult {
    /// Creates a successful result carrying the server payload.
    pub fn success(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        payload: serde_json::Value,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            server: None,
            outcome: ToolOutcome::Success { payload },
            elapsed_ms,
        }
    }

    /// Creates a failed result.
    pub fn failure(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        kind: ToolFailureKind,
        message: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            server: None,
            outcome: ToolOutcome::Failure {
                kind,
                message: message.into(),
            },
            elapsed_ms,
        }
    }

    /// Creates a failed result from a gateway error, using its message.
    ///
    /// Only `NotFound`, `InvalidArguments` and `Timeout` keep their own kind;
    /// every other error means the owning server could not serve the call.
    pub fn from_error(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        error: &GatewayError,
        elapsed_ms: u64,
    ) -> Self {
        let kind = match error.kind() {
            ErrorKind::NotFound => ToolFailureKind::NotFound,
            ErrorKind::InvalidArguments => ToolFailureKind::InvalidArguments,
            ErrorKind::Timeout => ToolFailureKind::Timeout,
            _ => ToolFailureKind::ServerUnavailable,
        };
        Self::failure(call_id, tool, kind, error.to_string(), elapsed_ms)
    }

    /// Attribute this result to the server that handled it.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// The failure kind, if this result is a gateway-side failure.
    pub fn failure_kind(&self) -> Option<ToolFailureKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// True for gateway failures and for payloads the tool itself flagged
    /// with `isError`.
    pub fn is_error(&self) -> bool {
        match &self.outcome {
            ToolOutcome::Failure { .. } => true,
            ToolOutcome::Success { payload } => payload
                .get("isError")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
        }
    }

    /// Concatenated text of the payload's `text` content blocks, or the
    /// failure message.
    pub fn text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Failure { kind, message } => {
                let kind = serde_json::to_value(kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default();
                format!("{kind}: {message}")
            }
            ToolOutcome::Success { payload } => match payload.get("content") {
                Some(serde_json::Value::Array(blocks)) => blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(serde_json::Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => payload.to_string(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_schema_parse_defaults() {
        let schema: ToolSchema = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(schema.name, "ping");
        assert!(schema.description.is_empty());
        assert_eq!(schema.input_schema["type"], "object");
    }

    #[test]
    fn test_tool_schema_renamed_keeps_schema() {
        let schema = ToolSchema::new("x", "does x", serde_json::json!({"type": "object"}));
        let alias = schema.renamed("b.x");
        assert_eq!(alias.name, "b.x");
        assert_eq!(alias.description, "does x");
        assert_eq!(alias.input_schema, schema.input_schema);
    }

    #[test]
    fn test_invocation_ids_are_unique() {
        let a = ToolInvocation::new("add", serde_json::json!({}));
        let b = ToolInvocation::new("add", serde_json::json!({}));
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("call_"));
    }

    #[test]
    fn test_result_text_and_error_flag() {
        let ok = ToolResult::success(
            "c1",
            "add",
            serde_json::json!({"content": [{"type": "text", "text": "4"}], "isError": false}),
            3,
        );
        assert!(!ok.is_error());
        assert_eq!(ok.text(), "4");

        let flagged = ToolResult::success(
            "c2",
            "div",
            serde_json::json!({"content": [{"type": "text", "text": "division by zero"}], "isError": true}),
            1,
        );
        assert!(flagged.is_error());
        assert_eq!(flagged.failure_kind(), None);

        let failed = ToolResult::failure("c3", "add", ToolFailureKind::Timeout, "no answer", 500);
        assert!(failed.is_error());
        assert_eq!(failed.failure_kind(), Some(ToolFailureKind::Timeout));
        assert_eq!(failed.text(), "timeout: no answer");
    }

    #[test]
    fn test_result_from_error_keeps_kind_and_message() {
        let err = GatewayError::InvalidArguments {
            tool: "add".into(),
            reason: "\"b\" is a required property".into(),
        };
        let result = ToolResult::from_error("c4", "add", &err, 0);
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::InvalidArguments));
        assert!(result.text().starts_with("invalid_arguments: Invalid arguments for 'add'"));

        let err = GatewayError::Connection {
            server: "calc".into(),
            reason: "broken pipe".into(),
        };
        let result = ToolResult::from_error("c5", "add", &err, 0);
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::ServerUnavailable));
        assert!(result.text().contains("broken pipe"));
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let failed = ToolResult::failure("c", "t", ToolFailureKind::NotFound, "missing", 0);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["kind"], "not_found");
    }
}
