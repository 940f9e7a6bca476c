//! The single MCP stdio session a daemon owns.
//!
//! The wrapper spawns the configured server as a child process and speaks
//! MCP over its stdio through the `rmcp` SDK. One session lives for the
//! whole daemon lifetime; concurrent tool calls share the cloneable peer
//! handle and the MCP layer serializes as needed.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, CallToolResult, Tool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult};

/// A running MCP client service with the no-op client handler.
type McpService = RunningService<RoleClient, ()>;

/// How long to wait for a graceful MCP close at shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One MCP stdio session.
///
/// The peer handle is cloneable and serves concurrent requests; the
/// service itself is kept aside solely so [`McpSession::close`] can shut it
/// down gracefully.
pub struct McpSession {
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpService>>,
}

impl McpSession {
    /// Spawn the server process and perform the MCP handshake.
    ///
    /// The child gets exactly `env` (the caller merges ambient and server
    /// environments); bare commands are resolved to absolute paths at spawn
    /// time so PATH quirks inside launchd jobs cannot pick a different
    /// binary than the user tested with.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be resolved, the process
    /// cannot be spawned, or the handshake fails.
    pub async fn start(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> DaemonResult<Self> {
        let resolved = resolve_command(command)?;

        let mut cmd = tokio::process::Command::new(&resolved);
        cmd.args(args);
        cmd.env_clear();
        cmd.envs(env);
        cmd.current_dir(cwd);

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| DaemonError::Session(format!("failed to spawn {resolved}: {e}")))?;

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| DaemonError::Session(format!("MCP handshake failed: {e}")))?;

        info!(command = resolved, "MCP session established");
        Ok(Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        })
    }

    /// Enumerate all tools exposed by the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the MCP request fails.
    pub async fn list_tools(&self) -> DaemonResult<Vec<Tool>> {
        self.peer
            .list_all_tools()
            .await
            .map_err(|e| DaemonError::Session(format!("listTools failed: {e}")))
    }

    /// Invoke a tool, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Tool`] with the upstream message preserved
    /// verbatim, or a timeout error once `timeout` elapses.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> DaemonResult<CallToolResult> {
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(name.to_string()),
            arguments: coerce_arguments(arguments),
            task: None,
        };

        debug!(tool = name, "calling MCP tool");
        match tokio::time::timeout(timeout, self.peer.call_tool(params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(DaemonError::Tool(e.to_string())),
            Err(_elapsed) => Err(DaemonError::Tool(format!(
                "tool {name} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Gracefully close the session, bounded by an internal deadline.
    ///
    /// Idempotent: later calls are no-ops.
    pub async fn close(&self) {
        let Some(mut service) = self.service.lock().await.take() else {
            return;
        };
        match service.close_with_timeout(CLOSE_TIMEOUT).await {
            Ok(Some(reason)) => {
                info!(?reason, "MCP session closed gracefully");
            },
            Ok(None) => {
                warn!(
                    timeout_secs = CLOSE_TIMEOUT.as_secs(),
                    "MCP session close timed out; dropping"
                );
            },
            Err(e) => {
                warn!(error = %e, "MCP session close join error");
            },
        }
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession").finish_non_exhaustive()
    }
}

/// Resolve a server command to something spawnable.
///
/// Absolute and relative paths pass through; bare names go through PATH
/// lookup once, here, so the identity's notion of "node" matches the
/// binary that actually runs.
fn resolve_command(command: &str) -> DaemonResult<String> {
    if command.contains('/') {
        return Ok(command.to_string());
    }
    match which::which(command) {
        Ok(path) => Ok(path.display().to_string()),
        Err(e) => Err(DaemonError::Session(format!(
            "cannot find {command} on PATH: {e}"
        ))),
    }
}

/// Shape arbitrary JSON into the `arguments` object MCP expects.
fn coerce_arguments(arguments: Option<Value>) -> Option<serde_json::Map<String, Value>> {
    match arguments {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            // Wrap non-object values rather than rejecting them.
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            Some(map)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_arguments_pass_through() {
        let args = coerce_arguments(Some(json!({"a": 1})));
        assert_eq!(args.unwrap().get("a"), Some(&json!(1)));
    }

    #[test]
    fn null_and_missing_arguments_are_none() {
        assert!(coerce_arguments(None).is_none());
        assert!(coerce_arguments(Some(Value::Null)).is_none());
    }

    #[test]
    fn scalar_arguments_are_wrapped() {
        let args = coerce_arguments(Some(json!(42))).unwrap();
        assert_eq!(args.get("value"), Some(&json!(42)));
    }

    #[test]
    fn pathlike_commands_skip_path_lookup() {
        assert_eq!(
            resolve_command("/usr/bin/true").unwrap(),
            "/usr/bin/true".to_string()
        );
    }

    #[test]
    fn unknown_bare_commands_fail_resolution() {
        let err = resolve_command("mcpli-test-no-such-binary").unwrap_err();
        assert!(matches!(err, DaemonError::Session(_)));
    }
}
