//! taskgrid-ledger — race-free multi-dimensional resource accounting.
//!
//! The [`ResourceLedger`] is the single source of truth for worker
//! capacity: total capability, current allocation, and worker state as
//! mirrored by the pool. Reservation and release are short, non-blocking
//! critical sections; reservations against different workers never
//! contend on the same lock.
//!
//! The ledger is one of exactly two pieces of cluster-wide mutable
//! state (the other is the pool's worker registry); every capacity
//! mutation in the system goes through [`ResourceLedger::try_reserve`]
//! and [`ResourceLedger::release`].

pub mod ledger;
pub mod snapshot;

pub use ledger::ResourceLedger;
pub use snapshot::{CapacitySnapshot, WorkerCapacity};
