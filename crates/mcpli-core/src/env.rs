//! The reserved environment contract between ensure and the daemon wrapper.
//!
//! The service definition carries these keys in its `EnvironmentVariables`
//! dict; the wrapper reads them at startup and strips them from the
//! environment it hands to the MCP child process.

/// Orchestrator mode: `launchd` or `standalone`.
pub const ENV_ORCHESTRATOR: &str = "MCPLI_ORCHESTRATOR";
/// Key under which the orchestrator advertises the inherited listener.
pub const ENV_SOCKET_ENV_KEY: &str = "MCPLI_SOCKET_ENV_KEY";
/// Socket path, for diagnostics only (never used for binding in launchd mode).
pub const ENV_SOCKET_PATH: &str = "MCPLI_SOCKET_PATH";
/// Working directory the daemon serves.
pub const ENV_CWD: &str = "MCPLI_CWD";
/// Daemon inactivity timeout in milliseconds.
pub const ENV_TIMEOUT: &str = "MCPLI_TIMEOUT";
/// MCP server command.
pub const ENV_COMMAND: &str = "MCPLI_COMMAND";
/// MCP server arguments as a JSON array.
pub const ENV_ARGS: &str = "MCPLI_ARGS";
/// MCP server environment as a JSON object.
pub const ENV_SERVER_ENV: &str = "MCPLI_SERVER_ENV";
/// The daemon id the service definition was generated for.
pub const ENV_ID_EXPECTED: &str = "MCPLI_ID_EXPECTED";

/// Orchestrator mode value: launchd socket activation.
pub const ORCHESTRATOR_LAUNCHD: &str = "launchd";
/// Orchestrator mode value: self-bound socket path.
pub const ORCHESTRATOR_STANDALONE: &str = "standalone";

/// Every reserved key, for ambient-environment stripping.
pub const RESERVED_KEYS: [&str; 9] = [
    ENV_ORCHESTRATOR,
    ENV_SOCKET_ENV_KEY,
    ENV_SOCKET_PATH,
    ENV_CWD,
    ENV_TIMEOUT,
    ENV_COMMAND,
    ENV_ARGS,
    ENV_SERVER_ENV,
    ENV_ID_EXPECTED,
];

/// Whether a key belongs to the reserved wrapper contract.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}
