//! Error types for dirlease
//!
//! This module defines the error type shared by the lease lock and the
//! resource store. Outcomes that are not failures (a stale lease being
//! reclaimed, a release that finds the lease already stolen) are reported
//! through [`AcquireOutcome`](crate::lock::AcquireOutcome) and
//! [`ReleaseOutcome`](crate::lock::ReleaseOutcome) instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for dirlease operations
#[derive(Error, Debug)]
pub enum DirLeaseError {
    /// I/O error on a marker directory or backing file
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The lease could not be acquired or reclaimed within the window
    #[error("Timed out after {} acquiring lease '{name}'{}", waited_display(.waited), last_state_display(.last_error))]
    AcquireTimeout {
        /// Lock name
        name: String,
        /// How long the caller waited
        waited: Duration,
        /// Last error or state observed while polling
        last_error: Option<String>,
    },

    /// Requested key is not bound in the store
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Backing store content could not be read or written
    #[error("Backing store error: {0}")]
    BackingStore(String),

    /// Backing store file does not exist
    #[error("Store not found: {0}")]
    StoreMissing(PathBuf),

    /// Store was destroyed by `close` and cannot be used again
    #[error("Store is closed: {0}")]
    StoreClosed(PathBuf),

    /// A held lease was reclaimed by another party
    #[error("Lease lost on '{0}'")]
    LeaseLost(String),

    /// Lock name is unusable
    #[error("Invalid lock name: {0:?}")]
    InvalidName(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DirLeaseError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::AcquireTimeout { .. })
    }

    /// Check if this error is an acquisition timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. })
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::StoreMissing(path) | Self::StoreClosed(path) => Some(path),
            _ => None,
        }
    }
}

fn waited_display(waited: &Duration) -> String {
    humantime::format_duration(*waited).to_string()
}

fn last_state_display(last_error: &Option<String>) -> String {
    match last_error {
        Some(state) => format!(" (last state: {})", state),
        None => String::new(),
    }
}

/// Result type alias for dirlease operations
pub type Result<T> = std::result::Result<T, DirLeaseError>;

impl From<serde_json::Error> for DirLeaseError {
    fn from(err: serde_json::Error) -> Self {
        DirLeaseError::BackingStore(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| DirLeaseError::io(path, e))
    }
}
