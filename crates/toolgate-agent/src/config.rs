//! Model and conversation loop settings.

use serde::{Deserialize, Serialize};
use toolgate_core::{GatewayError, GatewayResult};

/// Anthropic Messages API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier sent with every request.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Falls back to `ANTHROPIC_API_KEY` when loaded by the CLI.
    #[serde(default)]
    pub api_key: String,
    /// Override of the API endpoint, mainly for tests and proxies.
    pub api_base_url: Option<String>,
    /// Upper bound on tokens generated per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Bound on a single model HTTP call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model_id() -> String {
    "claude-3-5-sonnet-20240620".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            api_key: String::new(),
            api_base_url: None,
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ModelConfig {
    /// The API endpoint without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com")
            .trim_end_matches('/')
    }
}

/// Conversation loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum model calls per request (default: 20).
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Deadline for a whole request, tool calls included (default: 120).
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// Sent as the system prompt on every model call when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_turns() -> u32 {
    20
}

fn default_deadline() -> u64 {
    120
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            deadline_secs: default_deadline(),
            system_prompt: None,
        }
    }
}

impl OrchestratorConfig {
    /// Reject a zero turn limit or deadline.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.max_turns == 0 {
            return Err(GatewayError::Config("max_turns must be at least 1".into()));
        }
        if self.deadline_secs == 0 {
            return Err(GatewayError::Config(
                "deadline_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
