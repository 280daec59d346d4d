//! Scheduler error types.

use thiserror::Error;

use taskgrid_core::types::ResourceVector;

/// Errors that can occur during placement.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No Ready worker can satisfy the requirement right now. Reported
    /// to callers as retryable-by-client; never retried internally.
    #[error(
        "no worker can satisfy cpus={:.2} gpus={:.2} memory_gb={:.2}",
        .0.cpus, .0.gpus, .0.memory_gb
    )]
    ResourceExhausted(ResourceVector),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
