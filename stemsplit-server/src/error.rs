//! Error types for stemsplit-server
//!
//! Callers only ever see the fixed messages below. Internal causes are
//! logged where they occur.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{JobOutcome, ValidationError};

/// Message returned for every server-side failure
pub const PROCESSING_ERROR_MESSAGE: &str = "An error occurred while processing the file";

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Upload rejected before or during staging
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Request body larger than `max_upload_bytes` (413)
    #[error("File too large")]
    PayloadTooLarge,

    /// Unknown or disallowed artifact path (404)
    #[error("Not found")]
    NotFound,

    /// Job failed after staging (500)
    #[error("Processing failed: {0}")]
    Processing(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the response body
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Validation(e) if e.is_client_error() => e.to_string(),
            ApiError::PayloadTooLarge | ApiError::NotFound => self.to_string(),
            _ => PROCESSING_ERROR_MESSAGE.to_string(),
        }
    }
}

impl From<JobOutcome> for ApiError {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::ValidationError(e) => ApiError::Validation(e),
            other => ApiError::Processing(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
