use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use studysync_core::{ActionId, ActionRecord, ConflictResolution, SyncService, SyncSummary};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, OwnerTokenVerifier, QueueOwner};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{OwnerRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    service: SyncService,
    owner_verifier: Arc<OwnerTokenVerifier>,
    rate_limiter: Arc<OwnerRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, service: SyncService) -> Self {
        Self {
            owner_verifier: Arc::new(OwnerTokenVerifier::from_config(&config)),
            rate_limiter: Arc::new(OwnerRateLimiter::from_config(&config)),
            service,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(run_sync))
        .route("/sync/queue", post(queue_action))
        .route("/sync/pending", get(list_pending))
        .route("/sync/conflict/{id}/resolve", post(resolve_conflict))
        .route("/sync/failed/{id}/retry", post(retry_failed))
        .route("/sync/cleared", delete(purge_synced))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let owner = state.owner_verifier.resolve_owner(token)?;
    request.extensions_mut().insert(owner);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueRequest {
    action_type: String,
    #[serde(default)]
    action_data: Value,
}

async fn queue_action(
    State(state): State<AppState>,
    Extension(owner): Extension<QueueOwner>,
    request: Result<Json<QueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ActionRecord>), AppError> {
    state
        .rate_limiter
        .spend(ProtectedEndpoint::Enqueue, &owner)
        .await?;
    let Json(request) = request.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let record = state
        .service
        .enqueue(&owner.owner, &request.action_type, request.action_data)
        .await?;
    tracing::info!(
        endpoint = "sync_queue",
        user = owner.fingerprint(),
        action_id = %record.id,
        action_type = %record.action_type(),
        "Queued offline action"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

async fn run_sync(
    State(state): State<AppState>,
    Extension(owner): Extension<QueueOwner>,
) -> Result<Json<SyncSummary>, AppError> {
    state
        .rate_limiter
        .spend(ProtectedEndpoint::SyncRun, &owner)
        .await?;

    let summary = state.service.sync_all(&owner.owner).await?;
    tracing::info!(
        endpoint = "sync",
        user = owner.fingerprint(),
        session = owner.session.as_deref().unwrap_or("none"),
        synced = summary.synced,
        failed = summary.failed,
        conflicts = summary.conflicts,
        "Completed sync run"
    );
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
struct PendingResponse {
    actions: Vec<ActionRecord>,
}

async fn list_pending(
    State(state): State<AppState>,
    Extension(owner): Extension<QueueOwner>,
) -> Result<Json<PendingResponse>, AppError> {
    let actions = state.service.list_pending(&owner.owner).await?;
    Ok(Json(PendingResponse { actions }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    resolution: String,
    #[serde(default)]
    client_data: Option<Value>,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Extension(owner): Extension<QueueOwner>,
    Path(id): Path<String>,
    request: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<ActionRecord>, AppError> {
    let id = parse_action_id(&id)?;
    let Json(request) = request.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let resolution: ConflictResolution = request.resolution.parse()?;

    let record = state
        .service
        .resolve(&owner.owner, &id, resolution, request.client_data)
        .await?;
    tracing::info!(
        endpoint = "sync_resolve",
        user = owner.fingerprint(),
        action_id = %record.id,
        resolution = resolution.as_str(),
        status = record.status.as_str(),
        "Resolved conflicted action"
    );
    Ok(Json(record))
}

async fn retry_failed(
    State(state): State<AppState>,
    Extension(owner): Extension<QueueOwner>,
    Path(id): Path<String>,
) -> Result<Json<ActionRecord>, AppError> {
    let id = parse_action_id(&id)?;
    let record = state.service.retry_failed(&owner.owner, &id).await?;
    tracing::info!(
        endpoint = "sync_retry",
        user = owner.fingerprint(),
        action_id = %record.id,
        status = record.status.as_str(),
        "Retried failed action"
    );
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurgeQuery {
    older_than_days: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurgeResponse {
    deleted_count: u64,
}

async fn purge_synced(
    State(state): State<AppState>,
    Extension(owner): Extension<QueueOwner>,
    query: Result<Query<PurgeQuery>, QueryRejection>,
) -> Result<Json<PurgeResponse>, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let older_than_days = query
        .older_than_days
        .unwrap_or(state.config.default_retention_days);

    let deleted_count = state.service.purge(&owner.owner, older_than_days).await?;
    tracing::info!(
        endpoint = "sync_cleared",
        user = owner.fingerprint(),
        older_than_days,
        deleted_count,
        "Purged synced actions"
    );
    Ok(Json(PurgeResponse { deleted_count }))
}

fn parse_action_id(raw: &str) -> Result<ActionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("`{raw}` is not a valid action id")))
}
