use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = match &self {
            RpcError::NotFound(_) => StatusCode::NOT_FOUND,
            RpcError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Failures of a registry chain interaction
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Cannot connect to the given RPC: {0}")]
    Rpc(String),

    #[error("Error building transaction: {0}")]
    Build(String),

    #[error("Error sending transaction: {0}")]
    Send(String),

    #[error("{context}; last error: {}", .last_error.as_deref().unwrap_or("none"))]
    Timeout {
        context: String,
        last_error: Option<String>,
    },
}
