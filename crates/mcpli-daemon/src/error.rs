//! Daemon wrapper errors.

use thiserror::Error;

/// Errors that terminate or degrade the daemon wrapper.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A reserved environment variable is missing or malformed.
    #[error("wrapper environment: {0}")]
    Environment(String),

    /// The recomputed identity does not match the service definition.
    /// Fatal before any socket work; a stale definition must never serve.
    #[error("identity mismatch: expected {expected}, computed {computed}")]
    IdentityMismatch {
        /// Id the service definition was generated for.
        expected: String,
        /// Id recomputed from the wrapper's environment.
        computed: String,
    },

    /// The MCP child process could not be spawned or initialized.
    #[error("mcp session: {0}")]
    Session(String),

    /// A tool call failed upstream; the message is preserved verbatim.
    #[error("{0}")]
    Tool(String),

    /// IPC layer failure.
    #[error(transparent)]
    Ipc(#[from] mcpli_ipc::IpcError),

    /// Core layer failure.
    #[error(transparent)]
    Core(#[from] mcpli_core::CoreError),

    /// JSON (de)serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
