//! Tool call routing.

use crate::session::TransportError;
use crate::supervisor::Supervisor;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use toolgate_core::{GatewayError, ToolFailureKind, ToolInvocation, ToolResult};
use tracing::{info, warn};

/// Routes tool invocations to their owning server.
///
/// Every outcome is a [`ToolResult`]; nothing here returns an error.
#[derive(Clone)]
pub struct Dispatcher {
    supervisor: Arc<Supervisor>,
}

impl Dispatcher {
    /// A dispatcher over `supervisor`'s registry.
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    /// The supervisor that owns the servers.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Resolve, validate and invoke one tool call.
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> ToolResult {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;
        let fail = |error: GatewayError| {
            ToolResult::from_error(&invocation.id, &invocation.name, &error, elapsed())
        };

        let registry = self.supervisor.registry();
        let Some(entry) = registry.get(&invocation.name) else {
            warn!(tool = %invocation.name, "Model requested an unknown tool");
            return fail(GatewayError::NotFound(invocation.name.clone()));
        };
        let server = entry.server.clone();

        if let Err(reason) = entry.arguments.check(&invocation.arguments) {
            warn!(tool = %invocation.name, server = %server, reason = %reason, "Rejected tool arguments");
            return fail(GatewayError::InvalidArguments {
                tool: invocation.name.clone(),
                reason,
            })
            .with_server(server);
        }

        // The snapshot may be older than the latest health transition.
        let handle = match entry.handle() {
            Some(handle) if self.supervisor.is_current_ready(&handle) => handle,
            _ => {
                return fail(GatewayError::ServerUnavailable {
                    server: server.clone(),
                    reason: "not ready".into(),
                })
                .with_server(server);
            }
        };

        let result = match handle
            .call_tool(&entry.schema.name, invocation.arguments.clone())
            .await
        {
            Ok(payload) => {
                self.supervisor.record_success(&handle);
                ToolResult::success(&invocation.id, &invocation.name, payload, elapsed())
            }
            Err(TransportError::Timeout(bound)) => {
                let error = GatewayError::Timeout {
                    tool: invocation.name.clone(),
                    server: server.clone(),
                    timeout_ms: bound.as_millis() as u64,
                };
                self.supervisor.record_failure(&handle, &error.to_string());
                fail(error)
            }
            Err(TransportError::Rpc { code, message }) => {
                // The server is alive and answered; the call itself was refused.
                self.supervisor.record_success(&handle);
                ToolResult::failure(
                    &invocation.id,
                    &invocation.name,
                    ToolFailureKind::Rejected,
                    format!("Server '{server}' rejected the call ({code}): {message}"),
                    elapsed(),
                )
            }
            Err(e) => {
                let error = GatewayError::ServerUnavailable {
                    server: server.clone(),
                    reason: e.to_string(),
                };
                self.supervisor.record_failure(&handle, &error.to_string());
                fail(error)
            }
        }
        .with_server(server.clone());

        info!(
            tool = %invocation.name,
            server = %server,
            duration_ms = result.elapsed_ms,
            is_error = result.is_error(),
            "Tool call completed"
        );
        result
    }

    /// Dispatch a batch concurrently. Results come back in request order
    /// regardless of completion order.
    pub async fn dispatch_all(&self, invocations: &[ToolInvocation]) -> Vec<ToolResult> {
        join_all(invocations.iter().map(|invocation| self.dispatch(invocation))).await
    }
}
