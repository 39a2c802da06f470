//! Management API.
//!
//! # Endpoints
//!
//! - `POST /api/projects/signup`, `GET /api/projects/me`
//! - `GET /api/workers/list`, `GET /api/workers/get?name=`,
//!   `POST /api/workers/deploy`
//! - `GET /api/routes/list`, `POST /api/routes/add`, `POST /api/routes/delete`
//! - `GET /api/traffic`, `GET /api/traffic/:id`, `GET /api/metrics`
//! - `GET /api/logs`
//! - `GET /api/kv/list`, `POST /api/kv/set`, `POST /api/kv/delete`
//!
//! # Authentication
//!
//! Mutating endpoints and KV access take `Authorization: Bearer <token>`.
//! Everything the inspector reads is public.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Response, header};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use mini_edge_common::PlanConfig;
use mini_edge_state::{LogLine, StateError, TrafficRecord, TrafficStats, Usage};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    let Json(value) = payload?;
    Ok(value)
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub token: String,
    pub plan: String,
}

/// `POST /api/projects/signup`. The body is optional.
#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    payload: Option<Json<SignupRequest>>,
) -> ApiResult<Json<SignupResponse>> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let project = state.quota().signup(request.plan.as_deref()).await?;
    Ok(Json(SignupResponse {
        token: project.token,
        plan: project.plan,
    }))
}

#[derive(Debug, Serialize)]
pub struct ProjectInfo {
    pub plan: String,
    pub limits: PlanConfig,
    pub usage: Usage,
    pub workers: Vec<String>,
    pub created_at: i64,
}

/// `GET /api/projects/me`
pub async fn me(State(state): State<AppState>, auth: Authenticated) -> ApiResult<Json<ProjectInfo>> {
    Ok(Json(ProjectInfo {
        limits: state.quota().plan_of(&auth.token)?,
        usage: state.quota().usage(&auth.token)?,
        plan: auth.project.plan,
        workers: auth.project.workers.into_iter().collect(),
        created_at: auth.project.created_at,
    }))
}

// ============================================================================
// Workers
// ============================================================================

/// `GET /api/workers/list`: deployed worker names, sorted.
pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.workers().names())
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

/// `GET /api/workers/get?name=`: raw worker source.
pub async fn get_worker(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> ApiResult<Response<Body>> {
    let worker = state
        .workers()
        .get(&query.name)
        .ok_or_else(|| ApiError::not_found(format!("Worker '{}' not found", query.name)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        worker.source.clone(),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub name: String,
    pub code: String,
}

/// `POST /api/workers/deploy`
#[instrument(skip_all)]
pub async fn deploy_worker(
    State(state): State<AppState>,
    auth: Authenticated,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let worker = state
        .deploy_worker(&auth.token, &request.name, &request.code)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "name": worker.name,
        "content_hash": worker.content_hash,
    })))
}

// ============================================================================
// Routes
// ============================================================================

/// `GET /api/routes/list`: `{pattern: worker}` in table order.
pub async fn list_routes(State(state): State<AppState>) -> Json<Map<String, Value>> {
    Json(state.routes().list().await)
}

#[derive(Debug, Deserialize)]
pub struct AddRouteRequest {
    pub path: String,
    pub worker: String,
}

/// `POST /api/routes/add`: upsert a route to a worker the caller owns.
#[instrument(skip_all)]
pub async fn add_route(
    State(state): State<AppState>,
    auth: Authenticated,
    payload: Result<Json<AddRouteRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let worker = state
        .workers()
        .get(&request.worker)
        .ok_or_else(|| ApiError::not_found(format!("Worker '{}' not found", request.worker)))?;
    if worker.owner != auth.token {
        return Err(StateError::Forbidden(format!(
            "Worker '{}' belongs to another project",
            request.worker
        ))
        .into());
    }

    state.routes().upsert(&request.path, &request.worker).await?;
    info!(pattern = %request.path, worker = %request.worker, "Route added");
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRouteRequest {
    #[serde(alias = "route")]
    pub path: String,
}

/// `POST /api/routes/delete`. Accepts `{path}` or `{route}`.
#[instrument(skip_all)]
pub async fn delete_route(
    State(state): State<AppState>,
    _auth: Authenticated,
    payload: Result<Json<DeleteRouteRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let removed = state.routes().remove(&request.path).await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}

// ============================================================================
// Traffic, metrics and logs
// ============================================================================

/// `GET /api/traffic`: buffered records, newest first.
pub async fn list_traffic(State(state): State<AppState>) -> Json<Vec<Arc<TrafficRecord>>> {
    Json(state.traffic().list())
}

/// `GET /api/traffic/:id`
pub async fn get_traffic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Arc<TrafficRecord>>> {
    state
        .traffic()
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Traffic record '{id}' not found")))
}

/// `GET /api/metrics`
pub async fn metrics(State(state): State<AppState>) -> Json<TrafficStats> {
    Json(state.traffic().stats())
}

/// `GET /api/logs`: buffered worker log lines, oldest first.
pub async fn list_logs(State(state): State<AppState>) -> Json<Vec<LogLine>> {
    Json(state.logs().list())
}

// ============================================================================
// KV
// ============================================================================

/// `GET /api/kv/list`: the caller's namespace.
pub async fn kv_list(
    State(state): State<AppState>,
    auth: Authenticated,
) -> ApiResult<Json<Map<String, Value>>> {
    let kv = state.kv_namespace(&auth.token)?;
    Ok(Json(kv.list().await?))
}

#[derive(Debug, Deserialize)]
pub struct KvSetRequest {
    pub key: String,
    pub value: Value,
}

/// `POST /api/kv/set`
pub async fn kv_set(
    State(state): State<AppState>,
    auth: Authenticated,
    payload: Result<Json<KvSetRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    if request.key.is_empty() {
        return Err(ApiError::bad_request("Key must not be empty"));
    }
    let kv = state.kv_namespace(&auth.token)?;
    kv.put(&request.key, request.value).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct KvDeleteRequest {
    pub key: String,
}

/// `POST /api/kv/delete`
pub async fn kv_delete(
    State(state): State<AppState>,
    auth: Authenticated,
    payload: Result<Json<KvDeleteRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let request = body(payload)?;
    let kv = state.kv_namespace(&auth.token)?;
    let removed = kv.delete(&request.key).await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}
