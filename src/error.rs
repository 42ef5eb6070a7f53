use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Failures of coordinator operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("storage failure")]
    Storage(#[from] StorageError),
    /// No store is installed or the supervisor flagged it unhealthy.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The actor lacks the capability, e.g. a non-capo nominating.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The game or round is not in a phase that accepts the request.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// HTTP rendering of a [`ServiceError`].
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            // A lost insert race means the state moved on under the caller.
            ServiceError::Storage(StorageError::Conflict { .. }) => StatusCode::CONFLICT,
            ServiceError::Storage(_) | ServiceError::Degraded => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidState(_) => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let message = match &err {
            ServiceError::Storage(source) => format!("{err}: {source}"),
            _ => err.to_string(),
        };
        Self { status, message }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(ErrorBody { message: self.message })).into_response()
    }
}
