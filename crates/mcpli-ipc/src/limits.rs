//! Tunable server resource limits.
//!
//! Every knob reads from an environment variable and is clamped to a hard
//! cap, so a misconfigured deployment degrades instead of falling over.

use std::time::Duration;

/// Max concurrent connections env var.
pub const ENV_MAX_CONNECTIONS: &str = "MCPLI_MAX_CONNECTIONS";
/// Idle timeout env var (milliseconds).
pub const ENV_IDLE_TIMEOUT_MS: &str = "MCPLI_CONNECTION_IDLE_TIMEOUT_MS";
/// Listen backlog env var.
pub const ENV_LISTEN_BACKLOG: &str = "MCPLI_LISTEN_BACKLOG";
/// Soft frame limit env var (bytes).
pub const ENV_MAX_FRAME_BYTES: &str = "MCPLI_MAX_FRAME_BYTES";
/// Hard frame limit env var (bytes).
pub const ENV_KILL_THRESHOLD_BYTES: &str = "MCPLI_KILL_THRESHOLD_BYTES";

const DEFAULT_MAX_CONNECTIONS: usize = 64;
const CAP_MAX_CONNECTIONS: usize = 1000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 15_000;
const CAP_IDLE_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_LISTEN_BACKLOG: usize = 128;
const CAP_LISTEN_BACKLOG: usize = 2048;
const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
const DEFAULT_KILL_THRESHOLD_BYTES: usize = 2 * 1024 * 1024;

/// Resource limits applied by the IPC server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    /// Concurrent connections accepted for work; excess is refused.
    pub max_connections: usize,
    /// Window in which a connection must deliver a complete frame.
    pub idle_timeout: Duration,
    /// Listen backlog requested at bind time.
    pub listen_backlog: usize,
    /// Soft frame limit: oversize frames get an error response.
    pub max_frame_bytes: usize,
    /// Hard frame limit: crossing it closes the connection silently.
    pub kill_threshold_bytes: usize,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            kill_threshold_bytes: DEFAULT_KILL_THRESHOLD_BYTES,
        }
    }
}

impl ServerLimits {
    /// Resolve limits from the environment, clamping each to its cap.
    ///
    /// The invariant `max_frame_bytes < kill_threshold_bytes` is restored
    /// here if the environment violates it.
    #[must_use]
    pub fn from_env() -> Self {
        let mut limits = Self {
            max_connections: env_clamped(
                ENV_MAX_CONNECTIONS,
                DEFAULT_MAX_CONNECTIONS,
                CAP_MAX_CONNECTIONS,
            ),
            idle_timeout: Duration::from_millis(env_clamped(
                ENV_IDLE_TIMEOUT_MS,
                DEFAULT_IDLE_TIMEOUT_MS,
                CAP_IDLE_TIMEOUT_MS,
            )),
            listen_backlog: env_clamped(
                ENV_LISTEN_BACKLOG,
                DEFAULT_LISTEN_BACKLOG,
                CAP_LISTEN_BACKLOG,
            ),
            max_frame_bytes: env_clamped(
                ENV_MAX_FRAME_BYTES,
                DEFAULT_MAX_FRAME_BYTES,
                usize::MAX,
            ),
            kill_threshold_bytes: env_clamped(
                ENV_KILL_THRESHOLD_BYTES,
                DEFAULT_KILL_THRESHOLD_BYTES,
                usize::MAX,
            ),
        };
        if limits.max_frame_bytes >= limits.kill_threshold_bytes {
            limits.max_frame_bytes = limits.kill_threshold_bytes.saturating_sub(1);
        }
        limits
    }
}

fn env_clamped<T>(key: &str, default: T, cap: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .map_or(default, |v| if v > cap { cap } else { v })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let limits = ServerLimits::default();
        assert_eq!(limits.max_connections, 64);
        assert_eq!(limits.idle_timeout, Duration::from_millis(15_000));
        assert_eq!(limits.listen_backlog, 128);
        assert!(limits.max_frame_bytes < limits.kill_threshold_bytes);
    }

    #[test]
    fn from_env_without_overrides_matches_defaults() {
        // No MCPLI_* limit variables are set in the test environment.
        let limits = ServerLimits::from_env();
        assert_eq!(limits, ServerLimits::default());
        assert!(limits.max_frame_bytes < limits.kill_threshold_bytes);
    }
}
