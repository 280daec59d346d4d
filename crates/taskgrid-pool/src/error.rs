//! Pool error types.

use thiserror::Error;

use taskgrid_core::types::{TaskId, WorkerId};
use taskgrid_proto::ProtoError;

/// Errors from worker lifecycle and task transport.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The worker did not announce readiness within the startup
    /// timeout. Fatal for that slot, not for the pool.
    #[error("worker {0} did not become ready in time")]
    StartupTimeout(WorkerId),

    #[error("worker {worker_id} failed to start: {reason}")]
    StartupFailed { worker_id: WorkerId, reason: String },

    /// The worker died (heartbeat timeout, process exit, or connection
    /// loss) while tasks were outstanding.
    #[error("worker {0} lost")]
    WorkerLost(WorkerId),

    /// No result arrived within the per-task budget. Says nothing about
    /// the remote state; the work may still complete and be discarded.
    #[error("task {0} timed out")]
    TaskTimeout(TaskId),

    #[error("unknown worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error("no workers could be started")]
    NoWorkersStarted,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
