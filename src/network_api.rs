//! Network diagnostics HTTP API.
//!
//! Every response uses the diagnostics envelope (see [`crate::envelope`]).
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health`, `/api/health`, `/api/v1/health` | Liveness and database status |
//! | `POST` | `/api/v1/network/http` | HTTP request probe |
//! | `POST` | `/api/v1/network/dns` | DNS lookup |
//! | `POST` | `/api/v1/network/test/connectivity` | TCP reachability |
//! | `POST` | `/api/v1/network/scan` | TCP port scan |
//! | `POST` | `/api/v1/network/ssl/validate` | TLS certificate inspection |
//! | `POST` | `/api/v1/network/probe` | Any probe, selected by `kind` |
//! | `GET`  | `/api/v1/network/history` | Recently persisted probe results |

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{admission_middleware, Admission, AuthGate};
use crate::config::Config;
use crate::envelope::{success, DiagnosticsError, EnvelopeStyle};
use crate::error::ServiceError;
use crate::probe::{
    ConnectivityProbe, DnsProbe, HttpProbe, ProbeEngine, ProbeKind, ProbeRequest, ScanProbe,
    TlsProbe,
};
use crate::ratelimit::SlidingWindowLimiter;
use crate::server;
use crate::sink::{NullSink, ProbeSink, SqlProbeSink};

pub const SERVICE_NAME: &str = "network-diagnostics";
pub const HEALTH_PATHS: [&str; 3] = ["/health", "/api/health", "/api/v1/health"];

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Clone)]
pub struct NetworkState {
    pub engine: Arc<ProbeEngine>,
}

type ApiResult = Result<Response, DiagnosticsError>;

/// Builds the diagnostics router around an already-constructed engine and
/// admission policy.
pub fn build_router(
    engine: Arc<ProbeEngine>,
    admission: Arc<Admission>,
    config: &Config,
) -> Router {
    let state = NetworkState { engine };
    let mut router = Router::new();
    for path in HEALTH_PATHS {
        router = router.route(path, get(handle_health));
    }
    let router = router
        .route("/api/v1/network/http", post(handle_http))
        .route("/api/v1/network/dns", post(handle_dns))
        .route("/api/v1/network/test/connectivity", post(handle_connectivity))
        .route("/api/v1/network/scan", post(handle_scan))
        .route("/api/v1/network/ssl/validate", post(handle_tls))
        .route("/api/v1/network/probe", post(handle_probe))
        .route("/api/v1/network/history", get(handle_history))
        .fallback(handle_not_found)
        .layer(middleware::from_fn_with_state(admission, admission_middleware))
        .with_state(state);
    server::with_common_layers(router, server::diagnostics_cors(&config.cors))
}

/// Connects the probe sink (when configured) and assembles the router.
pub async fn router_from_config(config: &Config) -> Result<Router> {
    let sink: Arc<dyn ProbeSink> = match &config.diagnostics.database_url {
        Some(url) => match SqlProbeSink::connect(url).await {
            Ok(sink) => {
                tracing::info!("probe results will be persisted");
                Arc::new(sink)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "probe database unavailable, results will not be persisted"
                );
                Arc::new(NullSink)
            }
        },
        None => {
            tracing::warn!("no database configured, probe results will not be persisted");
            Arc::new(NullSink)
        }
    };

    let engine = Arc::new(ProbeEngine::new(
        sink,
        Duration::from_millis(config.diagnostics.default_timeout_ms),
    ));
    let auth = AuthGate::from_config(&config.auth);
    if auth.is_some() {
        tracing::info!("API key authentication enabled");
    }
    let admission = Arc::new(Admission {
        limiter: Arc::new(SlidingWindowLimiter::new(
            config.rate_limit.requests,
            config.rate_limit.window(),
        )),
        auth,
        style: EnvelopeStyle::Diagnostics,
        exempt_paths: HEALTH_PATHS.to_vec(),
    });
    Ok(build_router(engine, admission, config))
}

pub async fn run(config: &Config) -> Result<()> {
    let app = router_from_config(config).await?;
    server::bind_and_serve(&config.server.bind_addr(), app, SERVICE_NAME).await
}

async fn run_probe(state: &NetworkState, request: ProbeRequest) -> ApiResult {
    let result = state.engine.run(request).await?;
    Ok(success(result))
}

async fn handle_health(State(state): State<NetworkState>) -> Response {
    let database = state.engine.sink().health().await;
    success(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "dependencies": { "database": database },
    }))
}

async fn handle_http(
    State(state): State<NetworkState>,
    body: Result<Json<HttpProbe>, JsonRejection>,
) -> ApiResult {
    let Json(probe) = body?;
    run_probe(&state, ProbeRequest::Http(probe)).await
}

async fn handle_dns(
    State(state): State<NetworkState>,
    body: Result<Json<DnsProbe>, JsonRejection>,
) -> ApiResult {
    let Json(probe) = body?;
    run_probe(&state, ProbeRequest::Dns(probe)).await
}

async fn handle_connectivity(
    State(state): State<NetworkState>,
    body: Result<Json<ConnectivityProbe>, JsonRejection>,
) -> ApiResult {
    let Json(probe) = body?;
    run_probe(&state, ProbeRequest::Connectivity(probe)).await
}

async fn handle_scan(
    State(state): State<NetworkState>,
    body: Result<Json<ScanProbe>, JsonRejection>,
) -> ApiResult {
    let Json(probe) = body?;
    run_probe(&state, ProbeRequest::Scan(probe)).await
}

async fn handle_tls(
    State(state): State<NetworkState>,
    body: Result<Json<TlsProbe>, JsonRejection>,
) -> ApiResult {
    let Json(probe) = body?;
    run_probe(&state, ProbeRequest::Tls(probe)).await
}

async fn handle_probe(
    State(state): State<NetworkState>,
    body: Result<Json<ProbeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    run_probe(&state, request).await
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_history(
    State(state): State<NetworkState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let kind = match query.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        Some(raw) => Some(raw.parse::<ProbeKind>()?),
        None => None,
    };
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let records = state
        .engine
        .sink()
        .recent(kind.map(ProbeKind::as_str), limit)
        .await?;
    Ok(success(json!({
        "results": records,
        "count": records.len(),
        "limit": limit,
    })))
}

async fn handle_not_found() -> DiagnosticsError {
    DiagnosticsError(ServiceError::not_found("endpoint not found"))
}
