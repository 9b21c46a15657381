//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ledger::LedgerError;
use metrics_exporter_prometheus::BuildError;
use saga::SagaError;
use thiserror::Error;

/// Errors that abort process startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga service error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::UserNotFound(_) | SagaError::OrderNotFound(_) | SagaError::PaymentNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
