//! Error types for prsweep
//!
//! Centralized error handling using thiserror. Variants follow the
//! pass/item split: some abort the whole pass, the rest are caught per item.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::JobKey;

/// All error types that can occur in prsweep
#[derive(Debug, Error)]
pub enum SweepError {
    /// One discovery source could not be queried
    #[error("Discovery error for {source_name}: {message}")]
    Discovery { source_name: String, message: String },

    /// A workspace directory already exists for the key
    #[error("Workspace already in progress: {0}")]
    WorkspaceConflict(JobKey),

    /// The version-control primitive failed to create or remove a workspace
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// The external agent could not be started or supervised
    #[error("Agent error: {0}")]
    Agent(String),

    /// The state lock was not acquired within the bounded wait
    #[error("Timed out after {waited:?} waiting for state lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// A durable record exists but cannot be trusted
    #[error("State corruption in {}: {reason}", path.display())]
    StateCorruption { path: PathBuf, reason: String },

    /// Notification transport failure
    #[error("Notify error: {0}")]
    Notify(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// A job key string could not be parsed
    #[error("Invalid job key: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error from the hosting platform
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SweepError {
    /// Errors that abort the entire pass instead of a single item.
    pub fn is_pass_fatal(&self) -> bool {
        matches!(
            self,
            SweepError::LockTimeout { .. } | SweepError::StateCorruption { .. } | SweepError::Config(_)
        )
    }
}

/// Result type alias for prsweep operations
pub type Result<T> = std::result::Result<T, SweepError>;
