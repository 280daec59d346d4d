//! The resource ledger.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tracing::{debug, trace};

use taskgrid_core::types::{ResourceVector, WorkerId, WorkerState};

use crate::snapshot::{CapacitySnapshot, WorkerCapacity};

/// Per-worker accounting record.
///
/// Invariant: `allocated ⪯ capability` on every dimension, at all times.
struct LedgerEntry {
    capability: ResourceVector,
    allocated: ResourceVector,
    state: WorkerState,
}

/// Tracks total/available/allocated capacity per worker and in
/// aggregate, with atomic reserve/release.
///
/// Each worker has its own inner mutex, so concurrent reservations
/// against different workers proceed in parallel; the outer map lock is
/// only taken for writing on worker registration and removal.
pub struct ResourceLedger {
    entries: RwLock<HashMap<WorkerId, Mutex<LedgerEntry>>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker with its fixed capability. The worker starts
    /// Ready with nothing allocated. Re-registering an id replaces the
    /// previous entry.
    pub fn register(&self, worker_id: &str, capability: ResourceVector) {
        let mut entries = self.entries.write().expect("ledger lock");
        debug!(%worker_id, ?capability, "worker registered in ledger");
        entries.insert(
            worker_id.to_string(),
            Mutex::new(LedgerEntry {
                capability,
                allocated: ResourceVector::ZERO,
                state: WorkerState::Ready,
            }),
        );
    }

    /// Remove a worker and reclaim everything it had allocated.
    ///
    /// Returns the allocation that was outstanding, if the worker was
    /// known. This is the crash path: in-flight reservations die with
    /// the worker and later `release` calls for it become no-ops.
    pub fn remove(&self, worker_id: &str) -> Option<ResourceVector> {
        let mut entries = self.entries.write().expect("ledger lock");
        let entry = entries.remove(worker_id)?;
        let entry = entry.into_inner().expect("entry lock");
        debug!(
            %worker_id,
            reclaimed = ?entry.allocated,
            "worker removed from ledger"
        );
        Some(entry.allocated)
    }

    /// Mirror a worker state transition into the ledger.
    ///
    /// Returns false if the worker is unknown.
    pub fn set_state(&self, worker_id: &str, state: WorkerState) -> bool {
        let entries = self.entries.read().expect("ledger lock");
        match entries.get(worker_id) {
            Some(entry) => {
                entry.lock().expect("entry lock").state = state;
                true
            }
            None => false,
        }
    }

    /// Atomically charge `amount` against the worker iff the result
    /// still fits within its capability on every dimension and the
    /// worker accepts new tasks. No-op returning false otherwise.
    pub fn try_reserve(&self, worker_id: &str, amount: &ResourceVector) -> bool {
        let entries = self.entries.read().expect("ledger lock");
        let Some(entry) = entries.get(worker_id) else {
            return false;
        };

        let mut entry = entry.lock().expect("entry lock");
        if !entry.state.accepts_tasks() {
            return false;
        }

        let proposed = entry.allocated.add(amount);
        if !proposed.fits_within(&entry.capability) {
            trace!(%worker_id, ?amount, "reservation rejected, insufficient capacity");
            return false;
        }

        entry.allocated = proposed;
        trace!(%worker_id, ?amount, allocated = ?entry.allocated, "reserved");
        true
    }

    /// Return `amount` to the worker's available capacity, clamped so
    /// allocation never goes negative. A release for an unknown worker
    /// is a no-op: workers may die mid-task and take their ledger
    /// entry with them.
    pub fn release(&self, worker_id: &str, amount: &ResourceVector) {
        let entries = self.entries.read().expect("ledger lock");
        if let Some(entry) = entries.get(worker_id) {
            let mut entry = entry.lock().expect("entry lock");
            entry.allocated = entry.allocated.saturating_sub(amount);
            trace!(%worker_id, ?amount, allocated = ?entry.allocated, "released");
        }
    }

    /// Available capacity on one worker.
    pub fn available(&self, worker_id: &str) -> Option<ResourceVector> {
        let entries = self.entries.read().expect("ledger lock");
        let entry = entries.get(worker_id)?.lock().expect("entry lock");
        Some(entry.capability.saturating_sub(&entry.allocated))
    }

    /// Workers eligible for new reservations, with their current
    /// available capacity. The scheduler reads candidates from here
    /// directly.
    pub fn candidates(&self) -> Vec<(WorkerId, ResourceVector)> {
        let entries = self.entries.read().expect("ledger lock");
        entries
            .iter()
            .filter_map(|(id, entry)| {
                let entry = entry.lock().expect("entry lock");
                entry
                    .state
                    .accepts_tasks()
                    .then(|| (id.clone(), entry.capability.saturating_sub(&entry.allocated)))
            })
            .collect()
    }

    /// Read-only capacity snapshot for operators and tests.
    ///
    /// Cluster totals cover workers in Ready or Draining state;
    /// Draining workers still honor in-flight allocations.
    pub fn snapshot(&self) -> CapacitySnapshot {
        let entries = self.entries.read().expect("ledger lock");

        let mut workers = Vec::with_capacity(entries.len());
        let mut total = ResourceVector::ZERO;
        let mut allocated = ResourceVector::ZERO;

        for (id, entry) in entries.iter() {
            let entry = entry.lock().expect("entry lock");
            if entry.state.counts_capacity() {
                total = total.add(&entry.capability);
                allocated = allocated.add(&entry.allocated);
            }
            workers.push(WorkerCapacity {
                worker_id: id.clone(),
                state: entry.state,
                capability: entry.capability,
                allocated: entry.allocated,
            });
        }

        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        CapacitySnapshot {
            workers,
            total,
            available: total.saturating_sub(&allocated),
            allocated,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("ledger lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new()
    }
}
