//! launchd layer errors.

use thiserror::Error;

/// Errors from the orchestrator (launchd) layer.
#[derive(Debug, Error)]
pub enum LaunchdError {
    /// The platform has no supported service orchestrator.
    #[error("no supported service orchestrator on this platform")]
    OrchestratorUnavailable,

    /// A launchctl operation kept failing after bounded retries.
    #[error("launchctl {operation} failed after {attempts} attempts: {stderr}")]
    Retryable {
        /// The launchctl subcommand that failed.
        operation: String,
        /// How many attempts were made.
        attempts: u32,
        /// Last stderr output.
        stderr: String,
    },

    /// Spawning launchctl itself failed.
    #[error("failed to run launchctl: {0}")]
    Spawn(#[source] std::io::Error),

    /// A filesystem or validation failure from the core layer.
    #[error(transparent)]
    Core(#[from] mcpli_core::CoreError),

    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for launchd operations.
pub type LaunchdResult<T> = Result<T, LaunchdError>;
