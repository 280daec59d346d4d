//! Control API handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use taskgrid_core::types::{ResourceVector, WorkerState};
use taskgrid_ledger::CapacitySnapshot;
use taskgrid_pool::PoolError;

use crate::ApiState;

/// Response wrapper for consistent control-API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "taskgrid",
    }))
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let workers = state.pool.worker_count().await;
    let routes = state.routes.len();

    Json(serde_json::json!({
        "status": "running",
        "workers": { "active": workers },
        "routes": routes,
    }))
}

/// GET /api/v1/capacity
///
/// The read-only capacity snapshot: per-worker capability/allocation
/// plus cluster totals over Ready and Draining workers.
pub async fn capacity(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot: CapacitySnapshot = state.pool.ledger().snapshot();
    ApiResponse::ok(snapshot)
}

#[derive(Serialize)]
struct WorkerDetail {
    worker_id: String,
    pid: u32,
    state: WorkerState,
    capability: ResourceVector,
    in_flight: usize,
}

/// GET /api/v1/workers
pub async fn list_workers(State(state): State<ApiState>) -> impl IntoResponse {
    let mut details = Vec::new();
    for worker_id in state.pool.worker_ids().await {
        if let Some(handle) = state.pool.worker(&worker_id).await {
            details.push(WorkerDetail {
                worker_id,
                pid: handle.pid,
                state: handle.state(),
                capability: handle.capability,
                in_flight: handle.in_flight(),
            });
        }
    }
    ApiResponse::ok(details)
}

/// POST /api/v1/workers/{id}/drain
pub async fn drain_worker(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.pool.drain(&id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "worker_id": id,
            "state": "draining",
        }))
        .into_response(),
        Err(PoolError::UnknownWorker(_)) => {
            error_response("worker not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// POST /api/v1/workers/{id}/respawn
///
/// Explicit operator respawn of a dead slot; never automatic.
pub async fn respawn_worker(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.pool.respawn(&id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "worker_id": id,
            "state": "ready",
        }))
        .into_response(),
        Err(PoolError::UnknownWorker(_)) => {
            error_response("unknown worker slot", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}
