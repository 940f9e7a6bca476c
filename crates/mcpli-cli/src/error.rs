//! CLI error kinds and their exit codes.
//!
//! Exit code contract: 0 success, 1 user/validation error, 2 daemon or
//! transport error, 3 tool error surfaced from the MCP server.

use thiserror::Error;

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad invocation or unparseable input.
    #[error("{0}")]
    Usage(String),

    /// Core-layer validation or filesystem failure.
    #[error(transparent)]
    Core(#[from] mcpli_core::CoreError),

    /// Orchestrator failure.
    #[error(transparent)]
    Launchd(#[from] mcpli_launchd::LaunchdError),

    /// IPC transport failure.
    #[error(transparent)]
    Ipc(#[from] mcpli_ipc::IpcError),

    /// Daemon-side failure.
    #[error(transparent)]
    Daemon(#[from] mcpli_daemon::DaemonError),

    /// The tool itself reported an error; message preserved verbatim.
    #[error("{0}")]
    Tool(String),

    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// The process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) | Self::Core(_) => 1,
            Self::Launchd(_) | Self::Ipc(_) | Self::Daemon(_) | Self::Other(_) => 2,
            Self::Tool(_) => 3,
        }
    }
}

/// Result alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
