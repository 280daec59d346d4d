//! taskgrid-core — shared types and configuration.
//!
//! Domain types used across the TaskGrid crates (resource vectors, worker
//! states, task records) and the `taskgrid.toml` configuration parser.

pub mod config;
pub mod types;

pub use config::{
    ConfigError, FallbackConfig, FallbackMode, HttpConfig, PoolConfig, TaskGridConfig,
    WorkerRuntimeConfig, parse_duration,
};
pub use types::{ResourceVector, Task, TaskState, WorkerState};
