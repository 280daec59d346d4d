//! Shared domain types used across TaskGrid crates.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a worker process.
pub type WorkerId = String;

/// Unique identifier for a dispatched task.
pub type TaskId = String;

// ── Resources ──────────────────────────────────────────────────────

/// A multi-dimensional resource quantity: logical CPUs, accelerators,
/// and memory. All dimensions may be fractional: a task can reserve a
/// quarter of a GPU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub gpus: f64,
    #[serde(default)]
    pub memory_gb: f64,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector {
        cpus: 0.0,
        gpus: 0.0,
        memory_gb: 0.0,
    };

    pub fn new(cpus: f64, gpus: f64, memory_gb: f64) -> Self {
        Self {
            cpus,
            gpus,
            memory_gb,
        }
    }

    /// Component-wise sum.
    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpus: self.cpus + other.cpus,
            gpus: self.gpus + other.gpus,
            memory_gb: self.memory_gb + other.memory_gb,
        }
    }

    /// Component-wise subtraction, clamped at zero on every dimension.
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpus: (self.cpus - other.cpus).max(0.0),
            gpus: (self.gpus - other.gpus).max(0.0),
            memory_gb: (self.memory_gb - other.memory_gb).max(0.0),
        }
    }

    /// True if every dimension of `self` fits within `other`.
    pub fn fits_within(&self, other: &ResourceVector) -> bool {
        self.cpus <= other.cpus && self.gpus <= other.gpus && self.memory_gb <= other.memory_gb
    }

    /// Dimension sum, used as the scalarization for best-fit scoring.
    pub fn scalar(&self) -> f64 {
        self.cpus + self.gpus + self.memory_gb
    }

    pub fn is_zero(&self) -> bool {
        self.cpus == 0.0 && self.gpus == 0.0 && self.memory_gb == 0.0
    }
}

impl Default for ResourceVector {
    fn default() -> Self {
        Self::ZERO
    }
}

// ── Workers ────────────────────────────────────────────────────────

/// Lifecycle state of a worker process.
///
/// Transitions: `Spawning → Ready → (Draining) → Dead`. A worker counts
/// toward cluster capacity while Ready or Draining, but only Ready
/// workers accept new reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Spawning,
    Ready,
    Draining,
    Dead,
}

impl WorkerState {
    /// Whether the scheduler may place new tasks on this worker.
    pub fn accepts_tasks(&self) -> bool {
        *self == WorkerState::Ready
    }

    /// Whether the worker contributes to cluster capacity totals.
    /// Draining workers still honor in-flight reservations.
    pub fn counts_capacity(&self) -> bool {
        matches!(self, WorkerState::Ready | WorkerState::Draining)
    }
}

// ── Tasks ──────────────────────────────────────────────────────────

/// State of a single dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Rejected,
}

/// A unit of work created for one matched HTTP request.
///
/// Owned exclusively by the dispatching request and dropped once the
/// HTTP response is produced; there is no task history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub handler_id: String,
    pub assigned_worker_id: Option<WorkerId>,
    pub state: TaskState,
    pub created_at: u64,
    pub completed_at: Option<u64>,
}

impl Task {
    pub fn new(id: TaskId, handler_id: &str) -> Self {
        Self {
            id,
            handler_id: handler_id.to_string(),
            assigned_worker_id: None,
            state: TaskState::Pending,
            created_at: epoch_secs(),
            completed_at: None,
        }
    }

    /// Mark the task as sent to a worker.
    pub fn dispatched(&mut self, worker_id: &str) {
        self.assigned_worker_id = Some(worker_id.to_string());
        self.state = TaskState::Dispatched;
    }

    /// Terminal transition.
    pub fn finish(&mut self, state: TaskState) {
        self.state = state;
        self.completed_at = Some(epoch_secs());
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
