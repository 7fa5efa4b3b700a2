//! HTTP front door of the Toolgate gateway.
//!
//! [`GatewayServer`] builds the axum router: `POST /chat` runs a conversation,
//! `GET /health`, `/servers` and `/tools` expose supervisor state. Failures map
//! to status codes in [`ApiError`].

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{ChatRequest, ChatResponse, GatewayServer};
