use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Request-level failure taxonomy. Every variant maps to a status code and a
/// JSON `{"error": ...}` body; a failed request never leaves a partial
/// mutation behind.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing, malformed, or unverifiable credential. Fails closed before
    /// any business logic runs.
    #[error("Missing or invalid credentials")]
    Unauthorized,

    /// Verified caller without an admin marker on an admin endpoint.
    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::OptionNotFound(_) | StoreError::AdminNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            // Refusing to unseat the last admin is the caller's mistake, not
            // a server fault.
            StoreError::LastAdmin | StoreError::DuplicateOption(_) => {
                AppError::BadRequest(e.to_string())
            }
            StoreError::Backend(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
