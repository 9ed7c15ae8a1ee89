//! Server error taxonomy (spec §7) and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("upload session not found")]
    SessionNotFound,

    #[error("upload session mismatch: {0}")]
    SessionMismatch(String),

    #[error("chunk count mismatch: expected {expected}, got {got}")]
    ChunkCountMismatch { expected: u32, got: u32 },

    #[error("size mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: u64, got: u64 },

    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    IOFailure(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidPath(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::MissingField(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::SessionNotFound => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::SessionMismatch(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::ChunkCountMismatch { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::SizeMismatch { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::HashMismatch { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::IOFailure(e) => {
                tracing::error!("I/O failure: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal I/O failure".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
