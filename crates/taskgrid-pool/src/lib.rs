//! taskgrid-pool — supervised worker processes.
//!
//! Owns the worker lifecycle: spawning subprocesses, the ready
//! handshake, per-connection task transport, heartbeat supervision,
//! operator drains, and crash recovery. State machine per worker:
//!
//! ```text
//! Spawning ──ready──▶ Ready ──drain──▶ Draining
//!     │                 │                  │
//!     │ timeout         │ heartbeat loss / │ in-flight done
//!     ▼                 │ process exit     ▼
//!   (slot failed)       └───────────▶    Dead
//! ```
//!
//! A lost worker fails its in-flight tasks with `WorkerLost` and its
//! entire ledger entry is reclaimed. Respawning a dead slot is an
//! explicit operator action, never automatic.

pub mod error;
pub mod handle;
pub mod manager;

pub use error::PoolError;
pub use handle::{TaskOutcome, WorkerHandle};
pub use manager::PoolManager;
