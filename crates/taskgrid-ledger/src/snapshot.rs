//! Read-only capacity introspection types.
//!
//! Produced by [`crate::ResourceLedger::snapshot`] and served verbatim
//! by the control API. The scheduler never reads these; it consults
//! the ledger directly.

use serde::Serialize;

use taskgrid_core::types::{ResourceVector, WorkerId, WorkerState};

/// Capacity view of a single worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerCapacity {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    pub capability: ResourceVector,
    pub allocated: ResourceVector,
}

impl WorkerCapacity {
    pub fn available(&self) -> ResourceVector {
        self.capability.saturating_sub(&self.allocated)
    }
}

/// Cluster-wide capacity totals plus per-worker rows.
#[derive(Debug, Clone, Serialize)]
pub struct CapacitySnapshot {
    pub workers: Vec<WorkerCapacity>,
    pub total: ResourceVector,
    pub available: ResourceVector,
    pub allocated: ResourceVector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_available_is_capability_minus_allocated() {
        let worker = WorkerCapacity {
            worker_id: "w-1".to_string(),
            state: WorkerState::Ready,
            capability: ResourceVector::new(8.0, 1.0, 32.0),
            allocated: ResourceVector::new(2.0, 0.25, 4.0),
        };
        assert_eq!(worker.available(), ResourceVector::new(6.0, 0.75, 28.0));
    }

    #[test]
    fn snapshot_serializes_with_lowercase_state() {
        let snap = CapacitySnapshot {
            workers: vec![WorkerCapacity {
                worker_id: "w-1".to_string(),
                state: WorkerState::Draining,
                capability: ResourceVector::new(1.0, 0.0, 1.0),
                allocated: ResourceVector::ZERO,
            }],
            total: ResourceVector::new(1.0, 0.0, 1.0),
            available: ResourceVector::new(1.0, 0.0, 1.0),
            allocated: ResourceVector::ZERO,
        };

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["workers"][0]["state"], "draining");
        assert_eq!(json["total"]["cpus"], 1.0);
    }
}
