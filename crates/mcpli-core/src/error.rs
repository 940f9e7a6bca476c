//! Error types for mcpli core operations.

use thiserror::Error;

/// Errors produced by identity, path, and filesystem operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An identifier failed validation before path construction.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Input failed validation (bad path, unparseable params).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A filesystem operation failed.
    #[error("{path}: {source}")]
    Io {
        /// The path the operation was acting on.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A directory intended for sockets is not safe to use.
    #[error("unsafe socket directory {path}: {reason}")]
    UnsafeSocketDir {
        /// The offending directory.
        path: String,
        /// Why the directory was rejected.
        reason: String,
    },

    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Wrap an I/O error with the path it occurred on.
    #[must_use]
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
