//! Route manifest loading.
//!
//! The manifest is the registration SDK's output: an ordered JSON array
//! of route entries consumed exactly once at startup.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use taskgrid_core::types::ResourceVector;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to read route manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse route manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { path: String, method: String },

    #[error("invalid route {path:?}: {reason}")]
    InvalidRoute { path: String, reason: String },
}

/// One entry as it appears in the manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub methods: Vec<String>,
    /// Resource requirement charged for every request on this route.
    #[serde(default)]
    pub resources: ResourceVector,
    pub handler_id: String,
}

/// Load and parse a manifest file. Validation happens when the entries
/// are compiled into a [`crate::RouteTable`].
pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<ManifestEntry>, RouteError> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&content)?;
    Ok(entries)
}
