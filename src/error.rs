//! Error kinds shared by both services.
//!
//! Every client-visible failure is one of the [`ServiceError`] variants. The
//! variant decides the HTTP status; the envelope style of the service that
//! produced it decides the body shape (see [`crate::envelope`]).
//!
//! | Variant | Status |
//! |---------|--------|
//! | `InvalidInput` | 400 |
//! | `NotFound` | 404 |
//! | `Conflict` | 409 |
//! | `SizeLimit` | 400 |
//! | `DependencyMissing` | 500 |
//! | `ProbeFailure` | 500 |
//! | `RateLimited` | 429 |
//! | `Unauthorized` | 401 |
//! | `Internal` | 500 |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;

/// A failure with a well-defined client-facing kind.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed JSON, missing fields, bad ids, unsupported enum values.
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate campaign name.
    #[error("{0}")]
    Conflict(String),

    /// A sync matched more files than the campaign's `max_files`.
    #[error("{0}")]
    SizeLimit(String),

    /// A required backing service (database, API key) is not configured.
    #[error("{0}")]
    DependencyMissing(String),

    /// Network, DNS, or TLS failure while executing a probe.
    #[error("{0}")]
    ProbeFailure(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn probe(message: impl Into<String>) -> Self {
        ServiceError::ProbeFailure(message.into())
    }

    /// HTTP status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::SizeLimit(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::DependencyMissing(_)
            | ServiceError::ProbeFailure(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable kind label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::SizeLimit(_) => "size_limit",
            ServiceError::DependencyMissing(_) => "dependency_missing",
            ServiceError::ProbeFailure(_) => "probe_failure",
            ServiceError::RateLimited { .. } => "rate_limited",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(err.into())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(err.into())
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::InvalidInput(rejection.body_text())
    }
}

/// Parses a path segment as a UUID, mapping failure to `InvalidInput`.
pub fn parse_uuid(raw: &str, what: &str) -> Result<uuid::Uuid, ServiceError> {
    uuid::Uuid::parse_str(raw.trim())
        .map_err(|_| ServiceError::invalid(format!("invalid {} id: {}", what, raw)))
}
