//! HTTP plumbing shared by both services.
//!
//! Both routers get the same outer stack, outermost first:
//!
//! ```text
//! TraceLayer -> CorsLayer -> body limit (10 MB) -> admission -> handlers
//! ```
//!
//! [`serve`] runs a router until its shutdown future resolves, then stops
//! accepting connections and gives in-flight requests [`DRAIN_TIMEOUT`] to
//! finish before returning.

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;

/// Maximum request body size: 10 MB.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const CORS_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

fn origin_list(config: &CorsConfig) -> Vec<HeaderValue> {
    config
        .origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

/// CORS for the tracking service: configured origins only, with credentials.
pub fn tracker_cors(config: &CorsConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origin_list(config)))
        .allow_methods(CORS_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// CORS for the diagnostics service. In mirror mode any origin is echoed
/// back, otherwise only configured origins are allowed.
pub fn diagnostics_cors(config: &CorsConfig) -> CorsLayer {
    let origin = if config.mirror_origin {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origin_list(config))
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(CORS_METHODS)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_credentials(true)
}

/// Wraps `router` in the layers every service shares.
pub fn with_common_layers(router: Router, cors: CorsLayer) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Serves `app` on `listener` until `shutdown` resolves, then drains.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = stop_rx.await;
    });
    let mut handle = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut handle => {
            joined.context("server task failed")?.context("server error")?;
            return Ok(());
        }
        _ = shutdown => {}
    }

    tracing::info!(
        timeout_secs = DRAIN_TIMEOUT.as_secs(),
        "shutdown requested, draining in-flight requests"
    );
    let _ = stop_tx.send(());
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
        Ok(joined) => {
            joined.context("server task failed")?.context("server error")?;
            tracing::info!("server stopped");
        }
        Err(_) => {
            tracing::warn!("drain timed out, aborting remaining requests");
            handle.abort();
        }
    }
    Ok(())
}

/// Binds `addr` and serves `app` until SIGINT/SIGTERM.
pub async fn bind_and_serve(addr: &str, app: Router, service: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%service, addr = %listener.local_addr()?, "listening");
    serve(listener, app, shutdown_signal()).await
}
