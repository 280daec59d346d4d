//! taskgrid-api — the orchestrator's HTTP surface.
//!
//! Two kinds of traffic share one axum router:
//!
//! - **Application routes** from the route manifest are not registered
//!   on the router at all; the router's fallback runs the dispatch
//!   pipeline (route-table match → reserve → task → response), and a
//!   table miss hands the request to the configured fallback
//!   collaborator (mounted handler or reverse proxy).
//! - **Control routes** for operators:
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/status` | Orchestrator status |
//! | GET | `/api/v1/capacity` | Capacity snapshot |
//! | GET | `/api/v1/workers` | Per-worker detail |
//! | POST | `/api/v1/workers/{id}/drain` | Drain one worker |
//! | POST | `/api/v1/workers/{id}/respawn` | Respawn a dead slot |

pub mod dispatch;
pub mod fallback;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};

use taskgrid_pool::PoolManager;
use taskgrid_routes::RouteTable;
use taskgrid_scheduler::Scheduler;

pub use fallback::Fallback;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub routes: Arc<RouteTable>,
    pub scheduler: Arc<Scheduler>,
    pub pool: Arc<PoolManager>,
    pub fallback: Arc<Fallback>,
    /// Per-task result budget.
    pub task_timeout: Duration,
}

/// Build the complete router (control API + dispatch fallback).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/capacity", get(handlers::capacity))
        .route("/workers", get(handlers::list_workers))
        .route("/workers/{id}/drain", post(handlers::drain_worker))
        .route("/workers/{id}/respawn", post(handlers::respawn_worker));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api_routes)
        .fallback(dispatch::dispatch)
        .with_state(state)
}
