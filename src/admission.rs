//! Admission pipeline: rate limiting and API-key auth in front of every
//! non-health endpoint.
//!
//! Order per request:
//!
//! 1. `OPTIONS` preflights and exact health paths pass straight through.
//! 2. The client key ([`crate::client_id::client_key`]) is charged against
//!    the shared [`SlidingWindowLimiter`]; a denial is a 429.
//! 3. If an [`AuthGate`] is configured, the request must carry
//!    `X-API-Key: <key>` or `Authorization: Bearer <key>`.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::client_id::client_key;
use crate::config::{AuthConfig, AuthMode};
use crate::envelope::EnvelopeStyle;
use crate::error::ServiceError;
use crate::ratelimit::{Decision, SlidingWindowLimiter};

/// API-key gate. Only the diagnostics service installs one.
#[derive(Debug, Clone)]
pub struct AuthGate {
    api_key: Option<String>,
}

impl AuthGate {
    /// Returns a gate when `config` asks for strict auth.
    pub fn from_config(config: &AuthConfig) -> Option<Self> {
        match config.mode {
            AuthMode::Disabled => None,
            AuthMode::Strict => Some(Self {
                api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            }),
        }
    }

    pub fn check(&self, request: &Request<Body>) -> Result<(), ServiceError> {
        let expected = self.api_key.as_deref().ok_or_else(|| {
            ServiceError::DependencyMissing("API key not configured".to_string())
        })?;

        let headers = request.headers();
        let presented = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });

        match presented {
            Some(key) if key.trim() == expected => Ok(()),
            Some(_) => Err(ServiceError::Unauthorized("invalid API key".to_string())),
            None => Err(ServiceError::Unauthorized(
                "authentication required".to_string(),
            )),
        }
    }
}

pub struct Admission {
    pub limiter: Arc<SlidingWindowLimiter>,
    pub auth: Option<AuthGate>,
    pub style: EnvelopeStyle,
    /// Paths that bypass admission entirely (exact match).
    pub exempt_paths: Vec<&'static str>,
}

impl Admission {
    fn is_exempt(&self, request: &Request<Body>) -> bool {
        request.method() == Method::OPTIONS
            || self
                .exempt_paths
                .iter()
                .any(|p| *p == request.uri().path())
    }

    fn decide(&self, request: &Request<Body>) -> Result<(), ServiceError> {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let key = client_key(request.headers(), peer);

        if let Decision::Denied { retry_after } = self.limiter.admit(&key, Instant::now()) {
            tracing::warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            return Err(ServiceError::RateLimited {
                retry_after_secs: secs,
            });
        }

        if let Some(gate) = &self.auth {
            gate.check(request)?;
        }
        Ok(())
    }
}

pub async fn admission_middleware(
    State(admission): State<Arc<Admission>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if admission.is_exempt(&request) {
        return next.run(request).await;
    }
    match admission.decide(&request) {
        Ok(()) => next.run(request).await,
        Err(err) => admission.style.error_response(&err),
    }
}
