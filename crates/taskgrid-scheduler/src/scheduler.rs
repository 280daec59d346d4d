//! Best-fit placement.

use std::sync::Arc;

use tracing::{debug, trace};

use taskgrid_core::types::ResourceVector;
use taskgrid_ledger::ResourceLedger;
use taskgrid_pool::PoolManager;

use crate::error::{SchedulerError, SchedulerResult};
use crate::lease::WorkerLease;

/// Picks workers for resource requirements.
///
/// Reads candidates straight from the ledger, the same source the
/// capacity API snapshots, and holds no lock across any I/O.
pub struct Scheduler {
    pool: Arc<PoolManager>,
    ledger: Arc<ResourceLedger>,
}

impl Scheduler {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        let ledger = pool.ledger();
        Self { pool, ledger }
    }

    /// Reserve capacity for `requirement` on the best-fitting Ready
    /// worker.
    ///
    /// Candidates are ranked by the spare capacity they would have
    /// left after the reservation (dimension sum, ascending) and the
    /// first successful reservation wins; a candidate that changed
    /// under us simply falls through to the next. Returns
    /// [`SchedulerError::ResourceExhausted`] immediately when nothing
    /// fits.
    pub async fn acquire(&self, requirement: &ResourceVector) -> SchedulerResult<WorkerLease> {
        let mut candidates: Vec<(String, f64)> = self
            .ledger
            .candidates()
            .into_iter()
            .filter(|(_, available)| requirement.fits_within(available))
            .map(|(worker_id, available)| {
                let spare = available.saturating_sub(requirement).scalar();
                (worker_id, spare)
            })
            .collect();

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (worker_id, spare) in candidates {
            if !self.ledger.try_reserve(&worker_id, requirement) {
                // Lost a race with a concurrent reservation.
                trace!(%worker_id, "reservation raced, trying next candidate");
                continue;
            }

            match self.pool.worker(&worker_id).await {
                Some(worker) => {
                    debug!(
                        %worker_id,
                        spare_after = spare,
                        cpus = requirement.cpus,
                        gpus = requirement.gpus,
                        memory_gb = requirement.memory_gb,
                        "placed"
                    );
                    return Ok(WorkerLease::new(
                        worker,
                        Arc::clone(&self.ledger),
                        *requirement,
                    ));
                }
                None => {
                    // Worker vanished between the ledger read and the
                    // registry lookup; undo and keep going.
                    self.ledger.release(&worker_id, requirement);
                }
            }
        }

        debug!(
            cpus = requirement.cpus,
            gpus = requirement.gpus,
            memory_gb = requirement.memory_gb,
            "no eligible worker"
        );
        Err(SchedulerError::ResourceExhausted(*requirement))
    }
}
