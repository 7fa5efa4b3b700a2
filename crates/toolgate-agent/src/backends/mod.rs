//! Conversational model backends.

/// Anthropic Messages API.
pub mod claude;

use async_trait::async_trait;
use toolgate_core::{GatewayResult, Message, ToolInvocation, ToolSchema};

/// What the model answered for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// A terminal natural-language answer.
    Final(String),
    /// One or more tool calls, in the order the model listed them, plus any
    /// text it emitted alongside.
    ToolCalls {
        /// Text emitted before the calls, if any.
        text: Option<String>,
        /// The requested calls.
        calls: Vec<ToolInvocation>,
    },
}

/// The conversational model capability.
///
/// Implementations translate the history and tool list into their provider's
/// wire format. Any failure is reported as `GatewayError::ModelUnavailable`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one model turn over the full history with the tools on offer.
    async fn converse(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> GatewayResult<ModelReply>;
}
