//! IPC error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the IPC transport layer.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Could not connect to the daemon socket within the retry budget.
    #[error("could not connect to {path} within {budget_ms}ms: {reason}")]
    ConnectFailure {
        /// Socket path the client was dialing.
        path: String,
        /// Retry budget that was exhausted, in milliseconds.
        budget_ms: u128,
        /// Last underlying failure.
        reason: String,
    },

    /// A frame was oversize or not valid JSON.
    #[error("frame error: {0}")]
    Frame(String),

    /// No response arrived within the method timeout.
    #[error("ipc timeout after {:?}", .0)]
    Timeout(Duration),

    /// The caller aborted the request.
    #[error("request cancelled")]
    Cancelled,

    /// The daemon answered with an error response.
    #[error("{0}")]
    Daemon(String),

    /// Socket activation could not produce a listener.
    #[error("socket activation failed: {0}")]
    Activation(String),

    /// Underlying socket I/O failed.
    #[error("socket i/o: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A core-layer failure (path validation, directory hardening).
    #[error(transparent)]
    Core(#[from] mcpli_core::CoreError),
}

/// Result alias for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
