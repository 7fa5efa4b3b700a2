use super::{ModelBackend, ModelReply};
use crate::config::ModelConfig;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use toolgate_core::{
    ContentBlock, GatewayError, GatewayResult, Message, Role, ToolInvocation, ToolSchema,
};
use tracing::debug;

/// Characters the Messages API does not accept in a tool name.
static INVALID_NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex")
});

const MAX_TOOL_NAME_LEN: usize = 64;

/// Claude (Anthropic Messages API) backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    /// Build the backend and its HTTP client.
    pub fn new(config: ModelConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl ModelBackend for ClaudeBackend {
    async fn converse(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> GatewayResult<ModelReply> {
        let url = format!("{}/v1/messages", self.config.base_url());
        let tools = with_history_tools(tools, messages);
        let names = ToolNames::new(&tools);

        let claude_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": names.wire(&t.name),
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        let api_messages: Vec<Value> = messages
            .iter()
            .map(|m| encode_message(m, &names))
            .collect();

        let mut body = json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "messages": api_messages,
        });
        if let Some(sys) = system_prompt {
            body["system"] = json!(sys);
        }
        if !claude_tools.is_empty() {
            body["tools"] = Value::Array(claude_tools);
        }

        debug!(model = %self.config.model_id, messages = messages.len(), tools = tools.len(), "Calling Claude");

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::ModelUnavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::ModelUnavailable(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(GatewayError::ModelUnavailable(format!(
                "Claude API error {status}: {text}"
            )));
        }

        let resp_body: Value = serde_json::from_str(&text)
            .map_err(|e| GatewayError::ModelUnavailable(format!("invalid response body: {e}")))?;
        parse_claude_response(&resp_body, &names)
    }
}

/// The API refuses `tool_use` blocks naming a tool the request does not
/// define. Tools the history calls but `tools` lacks get a stub definition.
fn with_history_tools(tools: &[ToolSchema], messages: &[Message]) -> Vec<ToolSchema> {
    let mut defined = tools.to_vec();
    for name in messages.iter().flat_map(Message::tool_use_names) {
        if !defined.iter().any(|t| t.name == name) {
            defined.push(ToolSchema::new(
                name,
                "This tool is not available.",
                json!({"type": "object"}),
            ));
        }
    }
    defined
}

/// Per-request mapping between public tool names and API-safe names.
struct ToolNames {
    to_wire: HashMap<String, String>,
    from_wire: HashMap<String, String>,
}

impl ToolNames {
    fn new(tools: &[ToolSchema]) -> Self {
        let mut names = Self {
            to_wire: HashMap::new(),
            from_wire: HashMap::new(),
        };
        for tool in tools {
            let base = sanitize(&tool.name);
            let mut wire = base.clone();
            let mut n = 2;
            while names.from_wire.contains_key(&wire) {
                let suffix = format!("_{n}");
                let keep = MAX_TOOL_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
                wire = format!("{}{suffix}", &base[..keep]);
                n += 1;
            }
            names.to_wire.insert(tool.name.clone(), wire.clone());
            names.from_wire.insert(wire, tool.name.clone());
        }
        names
    }

    fn wire(&self, public: &str) -> String {
        self.to_wire
            .get(public)
            .cloned()
            .unwrap_or_else(|| sanitize(public))
    }

    fn public(&self, wire: &str) -> String {
        self.from_wire
            .get(wire)
            .cloned()
            .unwrap_or_else(|| wire.to_string())
    }
}

/// Replace disallowed characters with `_` and cap the length. The result is
/// always ASCII.
fn sanitize(name: &str) -> String {
    let mut clean = INVALID_NAME_CHARS.replace_all(name, "_").into_owned();
    if clean.is_empty() {
        clean.push_str("tool");
    }
    // Multi-byte characters were replaced above, so byte truncation is safe.
    clean.truncate(MAX_TOOL_NAME_LEN);
    clean
}

fn encode_message(message: &Message, names: &ToolNames) -> Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::ToolUse { id, name, input } => json!({
                "type": "tool_use",
                "id": id,
                "name": names.wire(name),
                "input": input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": encode_tool_content(content),
                "is_error": is_error,
            }),
        })
        .collect();
    json!({"role": role, "content": content})
}

/// Tool payload content as the API accepts it: a string, or text blocks only.
fn encode_tool_content(content: &Value) -> Value {
    match content {
        Value::String(_) => content.clone(),
        Value::Array(blocks) => {
            let texts: Vec<Value> = blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .map(|t| json!({"type": "text", "text": t}))
                .collect();
            if texts.is_empty() {
                Value::String(content.to_string())
            } else {
                Value::Array(texts)
            }
        }
        other => Value::String(other.to_string()),
    }
}

fn parse_claude_response(body: &Value, names: &ToolNames) -> GatewayResult<ModelReply> {
    let content = body["content"].as_array().ok_or_else(|| {
        GatewayError::ModelUnavailable("Missing content in Claude response".into())
    })?;

    let mut text_parts = Vec::new();
    let mut calls = Vec::new();

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                let id = block["id"].as_str().unwrap_or_default();
                let name = names.public(block["name"].as_str().unwrap_or_default());
                let arguments = match &block["input"] {
                    Value::Null => json!({}),
                    input => input.clone(),
                };
                calls.push(if id.is_empty() {
                    ToolInvocation::new(name, arguments)
                } else {
                    ToolInvocation::with_id(id, name, arguments)
                });
            }
            _ => {}
        }
    }

    let text = text_parts.join("\n");
    if calls.is_empty() {
        Ok(ModelReply::Final(text))
    } else {
        Ok(ModelReply::ToolCalls {
            text: (!text.is_empty()).then_some(text),
            calls,
        })
    }
}
