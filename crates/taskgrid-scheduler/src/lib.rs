//! taskgrid-scheduler — resource-aware worker selection.
//!
//! Given a route's resource requirement, [`Scheduler::acquire`] picks a
//! Ready worker via the ledger using best-fit placement: among workers
//! the requirement fits, prefer the one left with the least spare
//! capacity after the reservation, so small fractional requests pack
//! onto partially-used workers instead of spreading across idle ones.
//!
//! Placement is immediate accept-or-reject. There is no queue and no
//! internal retry: exhaustion surfaces to the caller, and retry policy
//! belongs to the client.

pub mod error;
pub mod lease;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use lease::WorkerLease;
pub use scheduler::Scheduler;
