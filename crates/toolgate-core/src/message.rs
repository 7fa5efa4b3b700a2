//! Conversation history as sent to the model.

use crate::tool::{ToolInvocation, ToolOutcome, ToolResult};
use serde::{Deserialize, Serialize};

/// The role of the participant that authored a [`Message`].
///
/// Tool results travel in `User` messages, as the model API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user, or tool results fed back to the model.
    User,
    /// The model.
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        /// Call id, echoed back by the matching result.
        id: String,
        /// Public tool name.
        name: String,
        /// Arguments object.
        input: serde_json::Value,
    },
    /// The result of a tool invocation, fed back to the model.
    ToolResult {
        /// Id of the `ToolUse` block this answers.
        tool_use_id: String,
        /// The tool's content blocks, or a failure description.
        content: serde_json::Value,
        /// Set for gateway failures and tool-flagged errors.
        #[serde(default)]
        is_error: bool,
    },
}

/// A single turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote the message.
    pub role: Role,
    /// Content blocks, in order.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Creates a user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Creates an assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Creates the assistant turn that requested `calls`, keeping any text the
    /// model emitted before them.
    pub fn tool_request(text: Option<&str>, calls: &[ToolInvocation]) -> Self {
        let mut content = Vec::with_capacity(calls.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        content.extend(calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        }));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Creates the user turn carrying tool results, in the given order.
    ///
    /// Failures are surfaced as error-flagged text rather than dropped.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        let content = results
            .iter()
            .map(|result| {
                let content = match &result.outcome {
                    ToolOutcome::Success { payload } => payload
                        .get("content")
                        .cloned()
                        .unwrap_or_else(|| serde_json::Value::String(payload.to_string())),
                    ToolOutcome::Failure { .. } => serde_json::Value::String(result.text()),
                };
                ContentBlock::ToolResult {
                    tool_use_id: result.call_id.clone(),
                    content,
                    is_error: result.is_error(),
                }
            })
            .collect();
        Self {
            role: Role::User,
            content,
        }
    }

    /// Concatenated text blocks of this message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Names of the tools this message asks for, in order.
    pub fn tool_use_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}
