//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::error::{ConfigError, PlaneError};

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration could not be loaded for a reload
    #[error("Configuration error: {0}")]
    Config(ConfigError),

    /// Recompilation or publication failed; the previous set keeps serving
    #[error("Reload rejected: {0}")]
    ReloadRejected(PlaneError),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                None,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
            ApiError::Config(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CONFIG_ERROR",
                err.to_string(),
                None,
            ),
            ApiError::ReloadRejected(err) => {
                let details = match err {
                    PlaneError::StaleRevision { current, offered } => Some(serde_json::json!({
                        "current_revision": current,
                        "offered_revision": offered,
                    })),
                    _ => None,
                };
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "RELOAD_REJECTED",
                    err.to_string(),
                    details,
                )
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<BootstrapError> for ApiError {
    fn from(err: BootstrapError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err)
    }
}

impl From<PlaneError> for ApiError {
    fn from(err: PlaneError) -> Self {
        match err {
            PlaneError::Config(e) => ApiError::Config(e),
            PlaneError::Storage(_) | PlaneError::Audit(_) => ApiError::Internal(err.to_string()),
            other => ApiError::ReloadRejected(other),
        }
    }
}
