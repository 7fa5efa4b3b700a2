//! JSON-RPC 2.0 message types for the tool server protocol.

use serde::{Deserialize, Serialize};
use toolgate_core::ToolSchema;

/// Protocol revision announced in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlation id, unique per session.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// A request with the given id.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// A notification; no answer is expected.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response to one of our requests.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    /// Id of the request this answers.
    pub id: u64,
    /// Set on success.
    pub result: Option<serde_json::Value>,
    /// Set on failure.
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Additional detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A frame received from a tool server, classified.
#[derive(Debug, Clone)]
pub enum IncomingFrame {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// A server-initiated request that expects an answer.
    Request {
        /// The server's request id, echoed in our answer.
        id: serde_json::Value,
        /// Requested method.
        method: String,
    },
    /// A server-initiated notification.
    Notification {
        /// Notification method.
        method: String,
    },
    /// An error the server could not attribute to a request (null id).
    Orphan(JsonRpcError),
}

#[derive(Deserialize)]
struct RawFrame {
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    method: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

/// Parse one newline-delimited frame.
///
/// Anything that is not a JSON-RPC 2.0 object is rejected; the caller treats
/// that as fatal to the session.
pub fn parse_frame(line: &str) -> Result<IncomingFrame, String> {
    let raw: RawFrame =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON-RPC frame: {e}"))?;

    if raw.jsonrpc.as_deref() != Some("2.0") {
        return Err("frame is missing \"jsonrpc\": \"2.0\"".into());
    }

    let id = raw.id.filter(|id| !id.is_null());

    if let Some(method) = raw.method {
        return Ok(match id {
            Some(id) => IncomingFrame::Request { id, method },
            None => IncomingFrame::Notification { method },
        });
    }

    match id {
        Some(id) => {
            let id = id
                .as_u64()
                .ok_or_else(|| format!("response id {id} is not a request id we issued"))?;
            if raw.result.is_none() && raw.error.is_none() {
                return Err(format!("response {id} has neither result nor error"));
            }
            Ok(IncomingFrame::Response(JsonRpcResponse {
                id,
                result: raw.result,
                error: raw.error,
            }))
        }
        None => match raw.error {
            Some(error) => Ok(IncomingFrame::Orphan(error)),
            None => Err("frame has no id, method or error".into()),
        },
    }
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Present when the server offers tools.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    /// Present when the server offers resources.
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
    /// Present when the server offers prompts.
    #[serde(default)]
    pub prompts: Option<serde_json::Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    /// Protocol revision the server speaks.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// What the server offers.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Who the server says it is.
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server identity from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    #[serde(default)]
    pub version: String,
}

/// One page of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    /// Tools on this page.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    /// Cursor for the next page, absent on the last one.
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}
