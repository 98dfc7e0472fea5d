//! promptq HTTP REST API
//!
//! Axum server running alongside the Unix socket IPC server on port 8767
//! (configurable). Each endpoint is a thin axum handler over an inner
//! function that returns `(StatusCode, Value)` and is tested directly.
//!
//! Endpoints:
//! - GET    /health
//! - GET    /version
//! - POST   /jobs               enqueue one job
//! - POST   /jobs/batch         enqueue a batch run
//! - POST   /jobs/:id/retry     requeue a failed job
//! - GET    /jobs/stats
//! - POST   /dispatch           run one dispatch cycle and return its report
//! - GET    /results?owner_id=
//! - DELETE /results/:id
//! - GET    /summaries?prompt_id=
//! - POST   /sweep              retention sweep
//!
//! Every request other than `/dispatch` also triggers a background dispatch.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use promptq_core::models::{BatchEnqueueRequest, JobType};
use promptq_core::PayloadError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::state::QueueState;
use crate::subsystems::enqueue::{self, RetryOutcome};
use crate::subsystems::{dispatcher, retention};

pub const DEFAULT_RESULT_LIMIT: i64 = 100;
pub const MAX_RESULT_LIMIT: i64 = 1000;

pub fn build_router(state: Arc<QueueState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/jobs", post(enqueue_handler))
        .route("/jobs/batch", post(enqueue_batch_handler))
        .route("/jobs/stats", get(stats_handler))
        .route("/jobs/:id/retry", post(retry_handler))
        .route("/dispatch", post(dispatch_handler))
        .route("/results", get(results_handler))
        .route("/results/:id", delete(delete_result_handler))
        .route("/summaries", get(summaries_handler))
        .route("/sweep", post(sweep_handler))
        .layer(middleware::from_fn_with_state(state.clone(), opportunistic_dispatch))
        .with_state(state)
}

/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(state: Arc<QueueState>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("promptq HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

async fn opportunistic_dispatch(State(state): State<Arc<QueueState>>, request: Request, next: Next) -> Response {
    let is_dispatch = request.uri().path() == "/dispatch";
    let response = next.run(request).await;
    if !is_dispatch {
        dispatcher::spawn_opportunistic(state);
    }
    response
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(default)]
    pub job_type: JobType,
    pub payload: Value,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResultsQuery {
    pub owner_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SummariesQuery {
    pub prompt_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SweepRequest {
    pub days: Option<u32>,
}

fn error_body(status: StatusCode, msg: impl std::fmt::Display) -> (StatusCode, Value) {
    (status, json!({ "error": msg.to_string(), "status": "error" }))
}

/// Input problems are the caller's fault; anything else is ours.
fn classify(e: anyhow::Error) -> (StatusCode, Value) {
    if e.downcast_ref::<PayloadError>().is_some() {
        error_body(StatusCode::BAD_REQUEST, format!("{:#}", e))
    } else {
        tracing::error!("Request failed: {:#}", e);
        error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    }
}

fn ok_json<T: serde::Serialize>(value: &T) -> (StatusCode, Value) {
    match serde_json::to_value(value) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(state: &QueueState) -> (StatusCode, Value) {
    match state.health().await {
        Ok(version) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": state.store_backend(),
                "store_version": version,
                "socket": state.config.service.socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "status": "unhealthy", "error": e.to_string() }),
        ),
    }
}

pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "promptq/1",
    })
}

pub async fn enqueue_inner(state: &QueueState, req: EnqueueRequest) -> (StatusCode, Value) {
    match enqueue::enqueue(state.store.as_ref(), &state.config, req.job_type, req.payload, req.priority).await {
        Ok(out) => (
            StatusCode::CREATED,
            json!({ "queued": true, "job_id": out.job_id, "run_id": out.run_id }),
        ),
        Err(e) => classify(e),
    }
}

pub async fn enqueue_batch_inner(state: &QueueState, req: BatchEnqueueRequest) -> (StatusCode, Value) {
    match enqueue::enqueue_batch(state.store.as_ref(), &state.config, req).await {
        Ok(out) => match serde_json::to_value(&out) {
            Ok(body) => (StatusCode::CREATED, body),
            Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        Err(e) => classify(e),
    }
}

pub async fn retry_inner(state: &QueueState, job_id: i64) -> (StatusCode, Value) {
    match enqueue::retry_job(state.store.as_ref(), job_id).await {
        Ok(RetryOutcome::Requeued(new_id)) => (
            StatusCode::CREATED,
            json!({ "queued": true, "job_id": new_id, "retried_from": job_id }),
        ),
        Ok(RetryOutcome::NotFound) => error_body(StatusCode::NOT_FOUND, format!("job {} not found", job_id)),
        Ok(RetryOutcome::NotFailed(status)) => error_body(
            StatusCode::CONFLICT,
            format!("job {} is {}; only failed jobs can be retried", job_id, status),
        ),
        Err(e) => classify(e),
    }
}

pub async fn stats_inner(state: &QueueState) -> (StatusCode, Value) {
    match state.store.job_stats().await {
        Ok(stats) => ok_json(&stats),
        Err(e) => classify(e.into()),
    }
}

pub async fn dispatch_inner(state: &QueueState) -> (StatusCode, Value) {
    match dispatcher::dispatch(state).await {
        Ok(report) => ok_json(&report),
        Err(e) => classify(e),
    }
}

pub async fn results_inner(state: &QueueState, query: ResultsQuery) -> (StatusCode, Value) {
    let Some(owner_id) = query.owner_id else {
        return error_body(StatusCode::BAD_REQUEST, "owner_id query parameter is required");
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RESULT_LIMIT)
        .clamp(1, MAX_RESULT_LIMIT);

    match state.store.list_results_for_owner(owner_id, limit).await {
        Ok(results) => (
            StatusCode::OK,
            json!({ "owner_id": owner_id, "count": results.len(), "results": results }),
        ),
        Err(e) => classify(e.into()),
    }
}

pub async fn delete_result_inner(state: &QueueState, result_id: i64) -> (StatusCode, Value) {
    match state.store.delete_result(result_id).await {
        Ok(true) => (StatusCode::OK, json!({ "deleted": true, "id": result_id })),
        Ok(false) => error_body(StatusCode::NOT_FOUND, format!("result {} not found", result_id)),
        Err(e) => classify(e.into()),
    }
}

pub async fn summaries_inner(state: &QueueState, query: SummariesQuery) -> (StatusCode, Value) {
    let Some(prompt_id) = query.prompt_id.filter(|p| !p.trim().is_empty()) else {
        return error_body(StatusCode::BAD_REQUEST, "prompt_id query parameter is required");
    };

    match state.store.list_summaries(&prompt_id).await {
        Ok(summaries) => (
            StatusCode::OK,
            json!({ "prompt_id": prompt_id, "count": summaries.len(), "summaries": summaries }),
        ),
        Err(e) => classify(e.into()),
    }
}

pub async fn sweep_inner(state: &QueueState, req: SweepRequest) -> (StatusCode, Value) {
    let days = req.days.unwrap_or(state.config.queue.retention_days);
    match retention::sweep_retention(state.store.as_ref(), days).await {
        Ok(report) => ok_json(&report),
        Err(e) => classify(e),
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(state): State<Arc<QueueState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn enqueue_handler(
    State(state): State<Arc<QueueState>>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let (status, body) = enqueue_inner(&state, req).await;
    (status, Json(body))
}

pub async fn enqueue_batch_handler(
    State(state): State<Arc<QueueState>>,
    Json(req): Json<BatchEnqueueRequest>,
) -> impl IntoResponse {
    let (status, body) = enqueue_batch_inner(&state, req).await;
    (status, Json(body))
}

pub async fn retry_handler(State(state): State<Arc<QueueState>>, Path(job_id): Path<i64>) -> impl IntoResponse {
    let (status, body) = retry_inner(&state, job_id).await;
    (status, Json(body))
}

pub async fn stats_handler(State(state): State<Arc<QueueState>>) -> impl IntoResponse {
    let (status, body) = stats_inner(&state).await;
    (status, Json(body))
}

pub async fn dispatch_handler(State(state): State<Arc<QueueState>>) -> impl IntoResponse {
    let (status, body) = dispatch_inner(&state).await;
    (status, Json(body))
}

pub async fn results_handler(
    State(state): State<Arc<QueueState>>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let (status, body) = results_inner(&state, query).await;
    (status, Json(body))
}

pub async fn delete_result_handler(
    State(state): State<Arc<QueueState>>,
    Path(result_id): Path<i64>,
) -> impl IntoResponse {
    let (status, body) = delete_result_inner(&state, result_id).await;
    (status, Json(body))
}

pub async fn summaries_handler(
    State(state): State<Arc<QueueState>>,
    Query(query): Query<SummariesQuery>,
) -> impl IntoResponse {
    let (status, body) = summaries_inner(&state, query).await;
    (status, Json(body))
}

pub async fn sweep_handler(
    State(state): State<Arc<QueueState>>,
    body: Option<Json<SweepRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = sweep_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// TESTS
// ============================================================================
