//! Worker leases — a placement plus its RAII reservation.

use std::sync::Arc;

use tracing::trace;

use taskgrid_core::types::ResourceVector;
use taskgrid_ledger::ResourceLedger;
use taskgrid_pool::WorkerHandle;

/// A committed reservation on one worker.
///
/// The reservation is charged before any network I/O and released
/// exactly once when the lease drops, whatever exit path the dispatch
/// takes (success, worker failure, timeout, or panic unwind). If the
/// worker died in the meantime its ledger entry is already gone and the
/// release is a no-op.
pub struct WorkerLease {
    pub worker: Arc<WorkerHandle>,
    ledger: Arc<ResourceLedger>,
    amount: ResourceVector,
}

impl WorkerLease {
    pub(crate) fn new(
        worker: Arc<WorkerHandle>,
        ledger: Arc<ResourceLedger>,
        amount: ResourceVector,
    ) -> Self {
        Self {
            worker,
            ledger,
            amount,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker.worker_id
    }

    pub fn amount(&self) -> ResourceVector {
        self.amount
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        trace!(worker_id = %self.worker.worker_id, "releasing reservation");
        self.ledger.release(&self.worker.worker_id, &self.amount);
    }
}
