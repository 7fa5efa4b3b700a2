//! Model backends and the conversation orchestrator for the Toolgate gateway.
//!
//! - [`backends`]: the [`ModelBackend`] trait and the Claude implementation.
//! - [`orchestrator`]: the bounded model and tool loop behind every chat
//!   request.
//! - [`config`]: model and loop settings.

pub mod backends;
pub mod config;
pub mod orchestrator;

pub use backends::claude::ClaudeBackend;
pub use backends::{ModelBackend, ModelReply};
pub use config::{ModelConfig, OrchestratorConfig};
pub use orchestrator::{ChatOutcome, Orchestrator, ToolCallSummary};
