//! Core types and error definitions for the Toolgate gateway.
//!
//! This crate provides the foundational types shared across all Toolgate crates,
//! including error handling, the conversation message model, and tool
//! invocation abstractions.
//!
//! # Main types
//!
//! - [`GatewayError`]: Unified error enum for every gateway subsystem.
//! - [`GatewayResult`]: Convenience alias for `Result<T, GatewayError>`.
//! - [`ErrorKind`]: Stable, serializable classification of a [`GatewayError`].
//! - [`Message`] / [`ContentBlock`]: One turn of a conversation.
//! - [`ToolSchema`]: A tool advertised by a tool server.
//! - [`ToolInvocation`]: A model-initiated tool call request.
//! - [`ToolResult`]: The typed outcome of dispatching a [`ToolInvocation`].

pub mod error;
pub mod message;
pub mod tool;

pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use message::{ContentBlock, Message, Role};
pub use tool::{ToolFailureKind, ToolInvocation, ToolOutcome, ToolResult, ToolSchema};
