//! taskgrid.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ResourceVector;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration string: {0:?}")]
    InvalidDuration(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGridConfig {
    pub http: HttpConfig,
    /// Path to the route manifest produced by the registration SDK.
    pub route_manifest: PathBuf,
    pub worker: WorkerRuntimeConfig,
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
    /// Worker pools to spawn at startup.
    #[serde(default, rename = "pool")]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Runtime settings shared by all workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRuntimeConfig {
    /// Program used to launch a worker process.
    pub command: String,
    /// Arguments placed before the socket/id/capability arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Application / handler-set identifier handed to each worker.
    pub app_id: String,
    /// Directory for per-worker Unix sockets.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: String,
    /// Missed heartbeat intervals before a worker is declared lost.
    #[serde(default = "default_missed_heartbeats")]
    pub missed_heartbeats: u32,
    #[serde(default = "default_task_timeout")]
    pub task_timeout: String,
}

impl WorkerRuntimeConfig {
    pub fn startup_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.startup_timeout)
            .ok_or_else(|| ConfigError::InvalidDuration(self.startup_timeout.clone()))
    }

    pub fn heartbeat_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.heartbeat_interval)
            .ok_or_else(|| ConfigError::InvalidDuration(self.heartbeat_interval.clone()))
    }

    pub fn task_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.task_timeout)
            .ok_or_else(|| ConfigError::InvalidDuration(self.task_timeout.clone()))
    }
}

/// Where unmatched requests go. Chosen once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub mode: FallbackMode,
    /// Base URL of the fallback service (proxy mode only).
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_fallback_timeout")]
    pub timeout: String,
}

impl FallbackConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.timeout)
            .ok_or_else(|| ConfigError::InvalidDuration(self.timeout.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// In-process handler mounted by the embedding application.
    Mounted,
    /// Reverse proxy to a configured base URL.
    Proxy,
}

/// A named group of identically-sized workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub count: usize,
    pub resources: ResourceVector,
    /// Accelerator device indices available to this pool. Assigned
    /// round-robin across the pool's workers.
    #[serde(default)]
    pub gpu_devices: Vec<u32>,
}

impl TaskGridConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: TaskGridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-time sanity checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[pool]] must be configured".to_string(),
            ));
        }
        for pool in &self.pools {
            if pool.count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "pool {:?} has count 0",
                    pool.name
                )));
            }
            if pool.resources.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "pool {:?} declares no resources",
                    pool.name
                )));
            }
        }
        if let Some(fallback) = &self.fallback {
            if fallback.mode == FallbackMode::Proxy && fallback.target.is_none() {
                return Err(ConfigError::Invalid(
                    "fallback.target is required in proxy mode".to_string(),
                ));
            }
            fallback.timeout()?;
        }
        self.worker.startup_timeout()?;
        self.worker.heartbeat_interval()?;
        self.worker.task_timeout()?;
        Ok(())
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_startup_timeout() -> String {
    "10s".to_string()
}

fn default_heartbeat_interval() -> String {
    "5s".to_string()
}

fn default_missed_heartbeats() -> u32 {
    3
}

fn default_task_timeout() -> String {
    "30s".to_string()
}

fn default_fallback_timeout() -> String {
    "30s".to_string()
}
