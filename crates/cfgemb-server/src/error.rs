//! API error type with HTTP status code mapping.
//!
//! [`ApiError`] implements `axum::response::IntoResponse` to produce
//! structured JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::registry::RegistryError;

/// Structured error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// API errors with HTTP status code mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Task or file not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request, including duplicate task ids (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Disk-space preflight failed (507).
    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    /// Internal server error (500).
    #[error("internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::InsufficientStorage(_) => {
                (StatusCode::INSUFFICIENT_STORAGE, "INSUFFICIENT_STORAGE")
            }
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let detail = ApiErrorDetail {
            code: code.to_string(),
            message: self.to_string(),
        };
        let body = serde_json::json!({
            "success": false,
            "error": detail,
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateTaskId(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}
