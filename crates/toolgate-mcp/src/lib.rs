//! Tool server plumbing for the Toolgate gateway.
//!
//! Leaves first:
//!
//! - [`session`]: one JSON-RPC channel (stdio child process or TCP socket)
//!   with id-correlated concurrent requests.
//! - [`handle`]: a connected server: its session, catalog and health record.
//! - [`registry`]: the collision-resolved catalog of every Ready server.
//! - [`supervisor`]: owns every handle: parallel startup and shutdown, health
//!   transitions, pings and reconnects.
//! - [`dispatcher`]: routes a tool invocation to its server and turns every
//!   failure into a typed [`toolgate_core::ToolResult`].

pub mod config;
pub mod dispatcher;
pub mod handle;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod supervisor;

pub use config::{ServerConfig, SupervisorConfig, TransportConfig};
pub use dispatcher::Dispatcher;
pub use handle::{Health, ServerHandle};
pub use registry::{Collision, ToolRegistry, ToolRegistryEntry};
pub use session::{Session, TransportError};
pub use supervisor::{ServerFailure, ServerStatus, StartupReport, Supervisor};
