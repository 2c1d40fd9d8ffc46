//! Visit-tracking HTTP API.
//!
//! Responses are entities directly; errors are `{"error": "..."}`. All
//! campaign routes live under `/api/v1/campaigns`.

use anyhow::Result;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::admission::{admission_middleware, Admission};
use crate::clock::{self, SharedClock};
use crate::config::Config;
use crate::envelope::{EnvelopeStyle, TrackerError};
use crate::error::{parse_uuid, ServiceError};
use crate::models::Campaign;
use crate::queries::DEFAULT_LIMIT;
use crate::ratelimit::SlidingWindowLimiter;
use crate::server;
use crate::tracker::{CampaignPatch, NewCampaign, Tracker};
use crate::visits::{AdjustAction, VisitRequest};

pub const SERVICE_NAME: &str = "visited-tracker";
pub const HEALTH_PATHS: [&str; 2] = ["/health", "/api/v1/health"];

#[derive(Clone)]
pub struct TrackerState {
    pub tracker: Arc<Tracker>,
}

type ApiResult = Result<Response, TrackerError>;

fn ok<T: serde::Serialize>(value: T) -> Response {
    Json(value).into_response()
}

fn created<T: serde::Serialize>(value: T) -> Response {
    (StatusCode::CREATED, Json(value)).into_response()
}

fn campaign_id(raw: &str) -> Result<uuid::Uuid, ServiceError> {
    parse_uuid(raw, "campaign")
}

pub fn build_router(tracker: Arc<Tracker>, admission: Arc<Admission>, config: &Config) -> Router {
    let state = TrackerState { tracker };
    let mut router = Router::new();
    for path in HEALTH_PATHS {
        router = router.route(path, get(handle_health));
    }
    let router = router
        .route("/api/v1/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/v1/campaigns/find-or-create", post(find_or_create))
        .route("/api/v1/campaigns/import", post(import_campaign))
        .route(
            "/api/v1/campaigns/{id}",
            get(get_campaign)
                .patch(update_campaign)
                .delete(delete_campaign),
        )
        .route("/api/v1/campaigns/{id}/visit", post(record_visit))
        .route("/api/v1/campaigns/{id}/adjust-visit", post(adjust_visit))
        .route("/api/v1/campaigns/{id}/structure/sync", post(sync_structure))
        .route(
            "/api/v1/campaigns/{id}/prioritize/least-visited",
            get(least_visited),
        )
        .route("/api/v1/campaigns/{id}/prioritize/most-stale", get(most_stale))
        .route("/api/v1/campaigns/{id}/coverage", get(coverage))
        .route("/api/v1/campaigns/{id}/export", get(export_campaign))
        .route("/api/v1/campaigns/{id}/reset", post(reset_campaign))
        .route("/api/v1/campaigns/{id}/files/by-path", get(file_by_path))
        .route("/api/v1/campaigns/{id}/files/exclude", post(bulk_exclude))
        .route(
            "/api/v1/campaigns/{id}/files/{file_id}/notes",
            patch(set_file_notes),
        )
        .route(
            "/api/v1/campaigns/{id}/files/{file_id}/priority",
            patch(set_file_priority),
        )
        .route(
            "/api/v1/campaigns/{id}/files/{file_id}/exclude",
            patch(set_file_excluded),
        )
        .fallback(handle_not_found)
        .layer(middleware::from_fn_with_state(admission, admission_middleware))
        .with_state(state);
    server::with_common_layers(router, server::tracker_cors(&config.cors))
}

/// Assembles the tracker router from configuration with the given clock.
pub fn router_from_config(config: &Config, clock: SharedClock) -> Router {
    let dir = config.tracker.campaigns_dir();
    tracing::info!(dir = %dir.display(), "campaign storage");
    let tracker = Arc::new(Tracker::new(dir, clock, config.tracker.default_max_files));
    let admission = Arc::new(Admission {
        limiter: Arc::new(SlidingWindowLimiter::new(
            config.rate_limit.requests,
            config.rate_limit.window(),
        )),
        auth: None,
        style: EnvelopeStyle::Tracking,
        exempt_paths: HEALTH_PATHS.to_vec(),
    });
    build_router(tracker, admission, config)
}

pub async fn run(config: &Config) -> Result<()> {
    if !config.tracker.lifecycle_managed {
        tracing::warn!(
            "not started by the lifecycle manager (VROOLI_LIFECYCLE_MANAGED is not \"true\")"
        );
    }
    let app = router_from_config(config, clock::system());
    server::bind_and_serve(&config.server.bind_addr(), app, SERVICE_NAME).await
}

async fn handle_health(State(state): State<TrackerState>) -> Response {
    let dir = state.tracker.store().dir();
    ok(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
        "storage": {
            "dir": dir.display().to_string(),
            "exists": dir.is_dir(),
        },
    }))
}

async fn list_campaigns(State(state): State<TrackerState>) -> ApiResult {
    let campaigns = state.tracker.list().await?;
    Ok(ok(json!({ "count": campaigns.len(), "campaigns": campaigns })))
}

async fn create_campaign(
    State(state): State<TrackerState>,
    body: Result<Json<NewCampaign>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    Ok(created(state.tracker.create(input).await?))
}

async fn find_or_create(
    State(state): State<TrackerState>,
    body: Result<Json<NewCampaign>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    let (campaign, was_created) = state.tracker.find_or_create(input).await?;
    let body = json!({ "campaign": campaign, "created": was_created });
    Ok(if was_created { created(body) } else { ok(body) })
}

async fn get_campaign(State(state): State<TrackerState>, Path(id): Path<String>) -> ApiResult {
    Ok(ok(state.tracker.get(campaign_id(&id)?).await?))
}

async fn update_campaign(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    body: Result<Json<CampaignPatch>, JsonRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Json(patch) = body?;
    Ok(ok(state.tracker.update(id, patch).await?))
}

async fn delete_campaign(State(state): State<TrackerState>, Path(id): Path<String>) -> ApiResult {
    state.tracker.delete(campaign_id(&id)?).await?;
    Ok(ok(json!({ "deleted": true })))
}

async fn record_visit(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    body: Result<Json<VisitRequest>, JsonRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Json(request) = body?;
    let recorded = state.tracker.record_visits(id, request).await?;
    Ok(ok(json!({ "campaign_id": id, "recorded": recorded })))
}

#[derive(Debug, Deserialize)]
struct AdjustBody {
    file_id: String,
    action: AdjustAction,
}

async fn adjust_visit(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    body: Result<Json<AdjustBody>, JsonRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Json(body) = body?;
    let file_id = parse_uuid(&body.file_id, "file")?;
    Ok(ok(state.tracker.adjust_visit(id, file_id, body.action).await?))
}

#[derive(Debug, Default, Deserialize)]
struct SyncBody {
    #[serde(default)]
    patterns: Option<Vec<String>>,
}

async fn sync_structure(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    body: Option<Json<SyncBody>>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let patterns = body.and_then(|Json(b)| b.patterns);
    let outcome = state.tracker.sync(id, patterns).await?;
    Ok(ok(json!({
        "campaign_id": id,
        "added_files": outcome.added_files,
        "deleted_files": outcome.deleted_files,
        "total_files": outcome.total_files,
        "snapshot_id": outcome.snapshot_id,
    })))
}

#[derive(Debug, Deserialize)]
struct PriorityQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    threshold: Option<f64>,
}

impl PriorityQuery {
    fn limit(&self) -> usize {
        self.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT)
    }
}

async fn least_visited(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    query: Result<Query<PriorityQuery>, QueryRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Query(query) = query?;
    let limit = query.limit();
    let files = state.tracker.least_visited(id, limit).await?;
    Ok(ok(json!({ "campaign_id": id, "files": files, "limit": limit })))
}

async fn most_stale(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    query: Result<Query<PriorityQuery>, QueryRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Query(query) = query?;
    let threshold = query.threshold.unwrap_or(0.0);
    if !threshold.is_finite() {
        return Err(ServiceError::invalid("threshold must be a number").into());
    }
    let result = state.tracker.most_stale(id, query.limit(), threshold).await?;
    Ok(ok(json!({
        "campaign_id": id,
        "files": result.files,
        "threshold": threshold,
        "critical_count": result.critical_count,
    })))
}

async fn coverage(State(state): State<TrackerState>, Path(id): Path<String>) -> ApiResult {
    Ok(ok(state.tracker.coverage(campaign_id(&id)?).await?))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default)]
    patterns: Option<String>,
}

async fn export_campaign(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Query(query) = query?;
    Ok(ok(state.tracker.export(id, query.patterns.as_deref()).await?))
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    #[serde(default)]
    merge: bool,
}

async fn import_campaign(
    State(state): State<TrackerState>,
    query: Result<Query<ImportQuery>, QueryRejection>,
    body: Result<Json<Campaign>, JsonRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let Json(campaign) = body?;
    let (view, was_created) = state.tracker.import(campaign, query.merge).await?;
    Ok(if was_created { created(view) } else { ok(view) })
}

async fn reset_campaign(State(state): State<TrackerState>, Path(id): Path<String>) -> ApiResult {
    Ok(ok(state.tracker.reset(campaign_id(&id)?).await?))
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    #[serde(default)]
    path: String,
}

async fn file_by_path(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    query: Result<Query<PathQuery>, QueryRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Query(query) = query?;
    Ok(ok(state.tracker.file_by_path(id, &query.path).await?))
}

#[derive(Debug, Deserialize)]
struct BulkExcludeBody {
    paths: Vec<String>,
    #[serde(default = "default_true")]
    excluded: bool,
}

fn default_true() -> bool {
    true
}

async fn bulk_exclude(
    State(state): State<TrackerState>,
    Path(id): Path<String>,
    body: Result<Json<BulkExcludeBody>, JsonRejection>,
) -> ApiResult {
    let id = campaign_id(&id)?;
    let Json(body) = body?;
    let result = state.tracker.bulk_exclude(id, &body.paths, body.excluded).await?;
    Ok(ok(json!({ "updated": result.updated, "not_found": result.not_found })))
}

fn file_ids(id: &str, file_id: &str) -> Result<(uuid::Uuid, uuid::Uuid), ServiceError> {
    Ok((campaign_id(id)?, parse_uuid(file_id, "file")?))
}

#[derive(Debug, Deserialize)]
struct NotesBody {
    notes: String,
}

async fn set_file_notes(
    State(state): State<TrackerState>,
    Path((id, file_id)): Path<(String, String)>,
    body: Result<Json<NotesBody>, JsonRejection>,
) -> ApiResult {
    let (id, file_id) = file_ids(&id, &file_id)?;
    let Json(body) = body?;
    Ok(ok(state.tracker.set_file_notes(id, file_id, body.notes).await?))
}

#[derive(Debug, Deserialize)]
struct PriorityBody {
    priority_weight: f64,
}

async fn set_file_priority(
    State(state): State<TrackerState>,
    Path((id, file_id)): Path<(String, String)>,
    body: Result<Json<PriorityBody>, JsonRejection>,
) -> ApiResult {
    let (id, file_id) = file_ids(&id, &file_id)?;
    let Json(body) = body?;
    Ok(ok(state
        .tracker
        .set_file_priority(id, file_id, body.priority_weight)
        .await?))
}

#[derive(Debug, Deserialize)]
struct ExcludeBody {
    excluded: bool,
}

async fn set_file_excluded(
    State(state): State<TrackerState>,
    Path((id, file_id)): Path<(String, String)>,
    body: Result<Json<ExcludeBody>, JsonRejection>,
) -> ApiResult {
    let (id, file_id) = file_ids(&id, &file_id)?;
    let Json(body) = body?;
    Ok(ok(state
        .tracker
        .set_file_excluded(id, file_id, body.excluded)
        .await?))
}

async fn handle_not_found() -> TrackerError {
    TrackerError(ServiceError::not_found("endpoint not found"))
}
