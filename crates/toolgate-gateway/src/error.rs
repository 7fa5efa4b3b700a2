//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use toolgate_core::{ErrorKind, GatewayError};
use tracing::error;

/// An error answered to an HTTP client as `{"error": kind, "message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body was unusable.
    #[error("{0}")]
    BadRequest(String),

    /// The conversation failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    /// Status code and the public error kind for this error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Gateway(err) => {
                let kind = err.public_kind();
                let status = match kind {
                    ErrorKind::ServerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    ErrorKind::TurnLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
                    ErrorKind::ModelUnavailable => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, kind.as_str())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            error!(status = status.as_u16(), kind, error = %self, "Request failed");
        }
        let body = json!({
            "error": kind,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
