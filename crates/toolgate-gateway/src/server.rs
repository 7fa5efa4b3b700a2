//! Router, shared state and request handlers.

use crate::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use toolgate_agent::{Orchestrator, ToolCallSummary};
use toolgate_core::{GatewayError, GatewayResult};
use toolgate_mcp::{Collision, ServerStatus, Supervisor};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

/// Shared application state.
pub struct AppState {
    /// Runs `/chat` conversations.
    pub orchestrator: Arc<Orchestrator>,
    /// Source of the introspection endpoints.
    pub supervisor: Arc<Supervisor>,
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's question; surrounding whitespace is ignored.
    pub query: String,
}

/// Answer of `POST /chat`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// The model's final answer.
    pub response: String,
    /// Model calls made.
    pub turns: u32,
    /// Tool calls made, in order.
    pub tool_calls: Vec<ToolCallSummary>,
}

#[derive(Debug, Serialize)]
struct ToolView {
    name: String,
    server: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolsResponse {
    tools: Vec<ToolView>,
    collisions: Vec<Collision>,
}

/// The HTTP front door.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router without cross-origin access.
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        Self::router(orchestrator)
    }

    /// Build the router, allowing browser requests from `allowed_origins`.
    ///
    /// `"*"` allows any origin; an empty list disables CORS entirely.
    pub fn build_with_cors(
        orchestrator: Arc<Orchestrator>,
        allowed_origins: &[String],
    ) -> GatewayResult<Router> {
        let app = Self::router(orchestrator);
        if allowed_origins.is_empty() {
            return Ok(app);
        }
        info!(origins = ?allowed_origins, "CORS enabled");
        Ok(app.layer(cors_layer(allowed_origins)?))
    }

    fn router(orchestrator: Arc<Orchestrator>) -> Router {
        let supervisor = orchestrator.dispatcher().supervisor().clone();
        let state = Arc::new(AppState {
            orchestrator,
            supervisor,
        });

        Router::new()
            .route("/chat", post(chat_handler))
            .route("/health", get(health_handler))
            .route("/servers", get(servers_handler))
            .route("/tools", get(tools_handler))
            .with_state(state)
    }
}

fn cors_layer(allowed_origins: &[String]) -> GatewayResult<CorsLayer> {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|e| GatewayError::Config(format!("invalid CORS origin '{o}': {e}")))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }

    let outcome = state.orchestrator.chat(query).await?;
    Ok(Json(ChatResponse {
        response: outcome.answer,
        turns: outcome.turns,
        tool_calls: outcome.tool_calls,
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "toolgate",
        "servers": state.supervisor.server_count(),
        "ready": state.supervisor.ready_count(),
        "tools": state.supervisor.registry().len(),
    }))
}

async fn servers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ServerStatus>> {
    Json(state.supervisor.status())
}

async fn tools_handler(State(state): State<Arc<AppState>>) -> Json<ToolsResponse> {
    let registry = state.supervisor.registry();
    let tools = registry
        .entries()
        .iter()
        .map(|entry| ToolView {
            name: entry.public_name.clone(),
            server: entry.server.clone(),
            description: entry.schema.description.clone(),
            input_schema: entry.schema.input_schema.clone(),
        })
        .collect();
    Json(ToolsResponse {
        tools,
        collisions: registry.collisions().to_vec(),
    })
}
