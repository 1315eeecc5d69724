//! Shared HTTP error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_voice::VoiceError;
use thiserror::Error;

use crate::transcript_log::TranscriptLogError;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream provider error: {0}")]
    Upstream(String),
    #[error("upstream provider timed out: {0}")]
    Timeout(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Timeout { .. } => ApiError::Timeout(e.to_string()),
            VoiceError::Config(_) => ApiError::InternalServerError(e.to_string()),
            _ => ApiError::Upstream(e.to_string()),
        }
    }
}

impl From<TranscriptLogError> for ApiError {
    fn from(e: TranscriptLogError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}
