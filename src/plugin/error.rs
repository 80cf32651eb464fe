//! Plugin engine error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur during plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A manifest or schema file is missing.
    #[error("Not found: {0}")]
    NotFound(PathBuf),

    /// The registry or another remote source could not be reached or answered badly.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The package name is reserved or blocked.
    #[error("Package '{0}' is blocked")]
    BlockedPackage(String),

    /// Another mutating operation is in flight.
    #[error("Another package operation is in progress ({active} active)")]
    GuardBusy { active: usize },

    /// Loading or initializing a plugin entry module failed.
    #[error("Capability probe failed for '{plugin}': {reason}")]
    ProbeFailure { plugin: String, reason: String },

    /// A manifest could not be interpreted.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PluginError {
    /// Build a probe failure.
    pub fn probe(plugin: impl Into<String>, reason: impl ToString) -> Self {
        Self::ProbeFailure { plugin: plugin.into(), reason: reason.to_string() }
    }

    /// Build a remote failure.
    pub fn remote(reason: impl ToString) -> Self {
        Self::RemoteUnavailable(reason.to_string())
    }
}
