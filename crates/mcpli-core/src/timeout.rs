//! Layered timeout configuration.
//!
//! Resolution order, highest wins: explicit per-call value, environment
//! variable, built-in default. Users express daemon and tool timeouts in
//! seconds; IPC values in milliseconds. All seconds→ms conversion happens
//! here so the rest of the codebase only ever sees [`Duration`]s.

use std::time::Duration;

/// Daemon inactivity timeout env var (seconds).
pub const ENV_DEFAULT_TIMEOUT: &str = "MCPLI_DEFAULT_TIMEOUT";
/// Tool execution timeout env var (milliseconds).
pub const ENV_TOOL_TIMEOUT_MS: &str = "MCPLI_TOOL_TIMEOUT_MS";
/// IPC transport timeout env var (milliseconds).
pub const ENV_IPC_TIMEOUT: &str = "MCPLI_IPC_TIMEOUT";
/// IPC connect retry budget env var (milliseconds).
pub const ENV_CONNECT_RETRY_BUDGET_MS: &str = "MCPLI_IPC_CONNECT_RETRY_BUDGET_MS";

/// Default daemon inactivity timeout: 30 minutes.
pub const DEFAULT_INACTIVITY: Duration = Duration::from_secs(1800);
/// Default tool execution timeout: 10 minutes.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_millis(600_000);
/// Default IPC transport timeout: tool timeout plus the safety buffer.
pub const DEFAULT_IPC_TIMEOUT: Duration = Duration::from_millis(660_000);
/// Default connect retry budget.
pub const DEFAULT_CONNECT_RETRY_BUDGET: Duration = Duration::from_millis(3000);
/// Connect retry budget used for the first call after a (re)load.
pub const RELOAD_CONNECT_RETRY_BUDGET: Duration = Duration::from_millis(8000);
/// Buffer added on top of the tool timeout for the IPC exchange.
pub const TOOL_IPC_BUFFER: Duration = Duration::from_millis(60_000);

/// Explicit overrides, each taking precedence over env and defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutOverrides {
    /// Daemon inactivity timeout.
    pub inactivity: Option<Duration>,
    /// Tool execution timeout.
    pub tool: Option<Duration>,
    /// IPC transport timeout.
    pub ipc: Option<Duration>,
    /// Connect retry budget.
    pub connect_retry_budget: Option<Duration>,
}

/// Fully resolved timeout configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Idle interval after which a daemon voluntarily exits.
    pub inactivity: Duration,
    /// Upper bound for a single MCP tool call.
    pub tool: Duration,
    /// Upper bound for one IPC request/response exchange.
    pub ipc: Duration,
    /// Total budget for connect attempts against the daemon socket.
    pub connect_retry_budget: Duration,
    /// Whether the tool timeout came from an explicit override or env var
    /// (as opposed to the built-in default). `listTools` only inherits the
    /// tool buffer when this is set.
    pub tool_explicit: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            inactivity: DEFAULT_INACTIVITY,
            tool: DEFAULT_TOOL_TIMEOUT,
            ipc: DEFAULT_IPC_TIMEOUT,
            connect_retry_budget: DEFAULT_CONNECT_RETRY_BUDGET,
            tool_explicit: false,
        }
    }
}

impl TimeoutConfig {
    /// Resolve timeouts from overrides and the process environment.
    #[must_use]
    pub fn resolve(overrides: &TimeoutOverrides) -> Self {
        let env_inactivity = env_positive(ENV_DEFAULT_TIMEOUT).map(Duration::from_secs);
        let env_tool = env_positive(ENV_TOOL_TIMEOUT_MS).map(Duration::from_millis);
        let env_ipc = env_positive(ENV_IPC_TIMEOUT).map(Duration::from_millis);
        let env_budget = env_positive(ENV_CONNECT_RETRY_BUDGET_MS).map(Duration::from_millis);

        let tool_explicit = overrides.tool.is_some() || env_tool.is_some();

        Self {
            inactivity: overrides
                .inactivity
                .or(env_inactivity)
                .unwrap_or(DEFAULT_INACTIVITY),
            tool: overrides.tool.or(env_tool).unwrap_or(DEFAULT_TOOL_TIMEOUT),
            ipc: overrides.ipc.or(env_ipc).unwrap_or(DEFAULT_IPC_TIMEOUT),
            connect_retry_budget: overrides
                .connect_retry_budget
                .or(env_budget)
                .unwrap_or(DEFAULT_CONNECT_RETRY_BUDGET),
            tool_explicit,
        }
    }

    /// The IPC timeout to use for a `callTool` exchange.
    ///
    /// Always at least the tool timeout plus the buffer, so the transport
    /// never gives up before the tool itself is allowed to.
    #[must_use]
    pub fn call_tool_ipc_timeout(&self) -> Duration {
        effective_ipc_timeout(self.ipc, self.tool)
    }

    /// The IPC timeout to use for a `listTools` exchange.
    ///
    /// Inherits the tool buffer only when a tool timeout was explicitly
    /// configured (schema validation may internally invoke tools).
    #[must_use]
    pub fn list_tools_ipc_timeout(&self) -> Duration {
        if self.tool_explicit {
            effective_ipc_timeout(self.ipc, self.tool)
        } else {
            self.ipc
        }
    }
}

/// `max(ipc, tool + buffer)`: the transport must outlive the tool call.
#[must_use]
pub fn effective_ipc_timeout(ipc: Duration, tool: Duration) -> Duration {
    ipc.max(tool.saturating_add(TOOL_IPC_BUFFER))
}

/// Read a positive integer from the environment; anything else is ignored.
fn env_positive(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
