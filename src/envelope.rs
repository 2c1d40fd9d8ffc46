//! Uniform JSON response envelopes.
//!
//! The diagnostics service wraps everything:
//!
//! ```json
//! { "success": true,  "data": { ... } }
//! { "success": false, "error": "message" }
//! ```
//!
//! The tracking service returns entities directly and errors as
//! `{ "error": "message" }`. The status code always comes from
//! [`ServiceError::status`].

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStyle {
    Diagnostics,
    Tracking,
}

impl EnvelopeStyle {
    pub fn error_response(self, err: &ServiceError) -> Response {
        let status = err.status();
        let message = err.to_string();
        let mut body = match self {
            EnvelopeStyle::Diagnostics => json!({ "success": false, "error": message }),
            EnvelopeStyle::Tracking => json!({ "error": message }),
        };

        if status.is_server_error() {
            tracing::error!(kind = err.kind(), error = %message, "request failed");
        } else {
            tracing::debug!(kind = err.kind(), error = %message, "request rejected");
        }

        let mut retry_after = None;
        if let ServiceError::RateLimited { retry_after_secs } = err {
            body["retry_after"] = json!(retry_after_secs);
            retry_after = HeaderValue::from_str(&retry_after_secs.to_string()).ok();
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// `{"success": true, "data": ...}` with status 200.
pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response()
}

/// Error wrapper rendered in the diagnostics envelope.
#[derive(Debug)]
pub struct DiagnosticsError(pub ServiceError);

impl<E: Into<ServiceError>> From<E> for DiagnosticsError {
    fn from(err: E) -> Self {
        DiagnosticsError(err.into())
    }
}

impl IntoResponse for DiagnosticsError {
    fn into_response(self) -> Response {
        EnvelopeStyle::Diagnostics.error_response(&self.0)
    }
}

/// Error wrapper rendered in the tracking envelope.
#[derive(Debug)]
pub struct TrackerError(pub ServiceError);

impl<E: Into<ServiceError>> From<E> for TrackerError {
    fn from(err: E) -> Self {
        TrackerError(err.into())
    }
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        EnvelopeStyle::Tracking.error_response(&self.0)
    }
}
