//! The dispatch pipeline: matched request → reserved worker → task →
//! HTTP response.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskgrid_core::types::{Task, TaskState};
use taskgrid_pool::PoolError;
use taskgrid_proto::{json_to_msgpack, msgpack_to_json};
use taskgrid_routes::RouteMatch;
use taskgrid_scheduler::SchedulerError;

use crate::ApiState;

/// Request body for dispatched routes: `{"args": {...}}`. Methods
/// without bodies dispatch with an empty argument map.
#[derive(Debug, Default, Deserialize)]
struct TaskRequest {
    #[serde(default)]
    args: serde_json::Map<String, serde_json::Value>,
}

/// Response envelope for dispatched tasks.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Exhausted(#[from] SchedulerError),

    #[error("task timed out")]
    TaskTimeout,

    #[error("worker lost during task")]
    WorkerLost,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    fn status(&self) -> StatusCode {
        match self {
            DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::TaskTimeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::WorkerLost => StatusCode::BAD_GATEWAY,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = Json(TaskResponse {
            success: false,
            result: None,
            error: Some(self.to_string()),
            worker_id: None,
            execution_time_ms: None,
        });
        (self.status(), body).into_response()
    }
}

/// Router fallback: every request no control route claimed lands here.
pub async fn dispatch(State(state): State<ApiState>, req: Request) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(matched) = state.routes.match_route(method.as_str(), &path) else {
        debug!(%method, %path, "no route matched, delegating to fallback");
        return state.fallback.handle(req).await;
    };

    match run_task(&state, matched, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn run_task(
    state: &ApiState,
    matched: RouteMatch,
    req: Request,
) -> Result<Response, DispatchError> {
    let started = std::time::Instant::now();
    let route = &matched.entry;

    let args = read_args(req, &matched).await?;
    let args = json_to_msgpack(&serde_json::Value::Object(args))
        .map_err(|e| DispatchError::BadRequest(e.to_string()))?;

    // Reserve before any worker I/O. On exhaustion no task exists and
    // no worker was contacted; the client may retry, we never do.
    let task_id = Uuid::new_v4().to_string();
    let lease = state.scheduler.acquire(&route.resources).await?;

    let mut task = Task::new(task_id.clone(), &route.handler_id);
    task.dispatched(lease.worker_id());
    info!(
        %task_id,
        handler = %route.handler_id,
        worker_id = %lease.worker_id(),
        "task dispatched"
    );

    let outcome = lease
        .worker
        .execute(&task_id, &route.handler_id, args, state.task_timeout)
        .await;

    let worker_id = lease.worker_id().to_string();
    // Exactly one release per task: dropping the lease releases the
    // reservation before the task is reported terminal. If the worker
    // died mid-task its ledger entry is already gone and this is a
    // no-op.
    drop(lease);

    let execution_time_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(outcome) if outcome.success => {
            task.finish(TaskState::Completed);
            let result = msgpack_to_json(&outcome.result)
                .map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(Json(TaskResponse {
                success: true,
                result: Some(result),
                error: None,
                worker_id: Some(worker_id),
                execution_time_ms: Some(execution_time_ms),
            })
            .into_response())
        }
        Ok(outcome) => {
            task.finish(TaskState::Failed);
            let error = msgpack_to_json(&outcome.result)
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|e| e.to_string());
            warn!(%task_id, %error, "task failed in worker");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TaskResponse {
                    success: false,
                    result: None,
                    error: Some(error),
                    worker_id: Some(worker_id),
                    execution_time_ms: Some(execution_time_ms),
                }),
            )
                .into_response())
        }
        Err(PoolError::TaskTimeout(_)) => {
            task.finish(TaskState::Failed);
            warn!(%task_id, %worker_id, "task timed out");
            Err(DispatchError::TaskTimeout)
        }
        Err(PoolError::WorkerLost(_)) => {
            task.finish(TaskState::Failed);
            warn!(%task_id, %worker_id, "worker lost during task");
            Err(DispatchError::WorkerLost)
        }
        Err(err) => {
            task.finish(TaskState::Failed);
            Err(DispatchError::Internal(err.to_string()))
        }
    }
}

/// Assemble the task argument map from the request body and bound path
/// parameters. Path parameters win on key collisions.
async fn read_args(
    req: Request,
    matched: &RouteMatch,
) -> Result<serde_json::Map<String, serde_json::Value>, DispatchError> {
    let body = req.into_body();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| DispatchError::BadRequest(e.to_string()))?;

    let request: TaskRequest = if bytes.is_empty() {
        TaskRequest::default()
    } else {
        serde_json::from_slice(&bytes).map_err(|e| DispatchError::BadRequest(e.to_string()))?
    };

    let mut args = request.args;
    for (name, value) in &matched.params {
        args.insert(
            name.clone(),
            serde_json::Value::String(value.clone()),
        );
    }
    Ok(args)
}
