//! Worker request handling.
//!
//! Every request that reaches a worker route goes through [`dispatch`]:
//! resolve, look up the worker, admit against the owner's quota, execute,
//! and write exactly one traffic record whatever the outcome, including a
//! caller that goes away mid-request.

use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, Method, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use mini_edge_core::{WorkerRequest, WorkerResponse};
use mini_edge_state::TrafficRecord;

use crate::error::ApiError;
use crate::request;
use crate::response;
use crate::state::AppState;

/// Invoke the worker resolved for the request path.
#[instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn handle_worker(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let request = request::worker_request(&method, &uri, &headers, &body);
    dispatch(&state, request).await
}

/// Playground request: run the worker behind `route`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub route: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// `POST /__run`: run a route from the dashboard playground.
///
/// The route string is resolved like a request path, so a pattern such as
/// `/todo/:id` resolves to itself with `id = ":id"`.
#[instrument(skip_all)]
pub async fn run_playground(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Response<Body> {
    let Json(run) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };

    let mut request = WorkerRequest::new(run.method.to_uppercase(), run.route);
    request.body = run.body;
    dispatch(&state, request).await
}

/// Resolve, admit, execute and record one worker request.
///
/// The work runs on a detached task. Once admitted, a request is recorded
/// even if the caller disconnects or the HTTP timeout drops this future.
pub async fn dispatch(state: &AppState, request: WorkerRequest) -> Response<Body> {
    let state = state.clone();
    match tokio::spawn(async move { execute_and_record(&state, request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            warn!(error = %join_error, "Dispatch task failed");
            ApiError::Internal(format!("Dispatch task failed: {join_error}")).into_response()
        }
    }
}

async fn execute_and_record(state: &AppState, request: WorkerRequest) -> Response<Body> {
    let start = Instant::now();
    let mut record =
        TrafficRecord::new(&request.method, &request.path).with_request(request::snapshot(&request));

    let outcome = invoke(state, request, &mut record).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(output) => {
            info!(
                route = %record.route,
                worker = record.worker.as_deref().unwrap_or_default(),
                status = output.status,
                duration_ms,
                "Worker request completed"
            );
            state
                .traffic()
                .record(record.succeeded(output.status, output.body_text(), duration_ms));
            response::from_worker(output)
        }
        Err(err) => {
            warn!(
                route = %record.route,
                code = %err.code(),
                error = %err,
                duration_ms,
                "Worker request failed"
            );
            let status = err.status();
            state
                .traffic()
                .record(record.failed(status.as_u16(), err.code(), err.to_string(), duration_ms));
            err.into_response()
        }
    }
}

async fn invoke(
    state: &AppState,
    request: WorkerRequest,
    record: &mut TrafficRecord,
) -> Result<WorkerResponse, ApiError> {
    let found = state
        .resolve(&request.path)
        .await
        .ok_or_else(|| ApiError::RouteNotFound(request.path.clone()))?;
    record.route.clone_from(&found.pattern);
    record.worker = Some(found.worker.clone());

    let worker = state
        .workers()
        .get(&found.worker)
        .ok_or_else(|| ApiError::not_found(format!("Worker '{}' is not deployed", found.worker)))?;

    state.quota().admit(&worker.owner)?;
    let capabilities = state.capabilities(&worker.owner)?;

    let request = request.with_params(found.params);
    let output = state
        .executor()
        .execute(&worker.name, &worker.source, request, capabilities)
        .await?;
    Ok(output)
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ready",
        "workers": state.workers().len(),
        "routes": state.routes().len().await,
        "cached_modules": state.executor().loader().cache().len(),
    });

    (StatusCode::OK, Json(body))
}
