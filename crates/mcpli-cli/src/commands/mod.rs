//! Command implementations behind the clap surface.

pub(crate) mod daemon;
pub(crate) mod run;

use std::path::PathBuf;
use std::time::Duration;

use mcpli_core::Scope;
use mcpli_launchd::{EnsureEngine, LaunchctlDriver};

use crate::error::{CliError, CliResult};

/// Global flags shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GlobalFlags {
    /// Print raw JSON results instead of rendered text.
    pub raw: bool,
    /// Daemon debug logging.
    pub debug: bool,
    /// Verbose client output.
    pub verbose: bool,
    /// Suppress non-essential client output.
    pub quiet: bool,
    /// Daemon inactivity timeout override (seconds).
    pub timeout: Option<u64>,
    /// Tool timeout override (seconds).
    pub tool_timeout: Option<u64>,
}

impl GlobalFlags {
    /// Inactivity override as a duration.
    pub(crate) fn inactivity(self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Tool timeout override as a duration.
    pub(crate) fn tool(self) -> Option<Duration> {
        self.tool_timeout.map(Duration::from_secs)
    }
}

/// Scope for the current working directory.
pub(crate) fn current_scope() -> CliResult<Scope> {
    let cwd = std::env::current_dir()
        .map_err(|e| CliError::Usage(format!("cannot determine working directory: {e}")))?;
    Ok(Scope::new(cwd)?)
}

/// Ensure engine wired to the system launchctl and this binary.
pub(crate) fn system_engine(scope: Scope) -> CliResult<EnsureEngine> {
    let binary = current_binary()?;
    Ok(EnsureEngine::new(scope, LaunchctlDriver::system(), binary))
}

/// Absolute path of the running mcpli binary (goes into ProgramArguments).
pub(crate) fn current_binary() -> CliResult<PathBuf> {
    std::env::current_exe()
        .map_err(|e| CliError::Usage(format!("cannot determine mcpli binary path: {e}")))
}
