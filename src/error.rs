//! Error taxonomy shared by every REST handler.
//!
//! The split matters for what leaks to the wire: authentication failures
//! always surface as a generic 401 (the distinguishing reason is logged
//! server-side only), validation failures carry a specific safe message,
//! and not-found is deliberately reused for ownership mismatches so a
//! caller can never probe whether another device's resource exists.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad, missing, expired, or replayed credential. The inner reason is
    /// for the log line only — the response body never includes it.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request, unknown command, bad format. Safe to return.
    #[error("{0}")]
    Validation(String),

    /// Unknown device/pairing/command. Acknowledgment reuses the generic
    /// `"not found"` for ownership mismatches so existence of other
    /// devices' resources never leaks; dispatch keeps its specific
    /// `"device not found"` message — there the caller is an
    /// authenticated app asking about its own device.
    #[error("{0}")]
    NotFound(&'static str),

    /// Underlying store unavailable. Not retried here; caller may retry.
    #[error("storage unavailable: {0}")]
    Store(#[from] sqlx::Error),

    /// Missing signing secret or broken daemon configuration. Fails
    /// closed: never downgraded to an insecure default.
    #[error("configuration error: {0}")]
    Config(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Unauthorized(reason) => {
                warn!(reason = %reason, "request rejected: unauthorized");
                (StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" }))
            }
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Store(e) => {
                error!("storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
            ApiError::Config(msg) => {
                error!("configuration error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
