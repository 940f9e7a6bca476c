//! Wrapper environment bootstrap.
//!
//! The service definition carries the daemon's whole configuration through
//! reserved `MCPLI_*` environment variables. Decoding is strict: a wrapper
//! with a broken contract must die loudly rather than serve the wrong
//! server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use mcpli_core::env::{
    ENV_ARGS, ENV_COMMAND, ENV_CWD, ENV_ID_EXPECTED, ENV_ORCHESTRATOR, ENV_SERVER_ENV,
    ENV_SOCKET_ENV_KEY, ENV_SOCKET_PATH, ENV_TIMEOUT, ORCHESTRATOR_LAUNCHD,
    ORCHESTRATOR_STANDALONE, is_reserved_key,
};
use mcpli_core::identity::{DaemonIdentity, derive_identity_env};

use crate::error::{DaemonError, DaemonResult};

/// Which orchestrator spawned this wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorMode {
    /// launchd socket activation; the listener is inherited, no fallback.
    Launchd,
    /// Standalone; the wrapper binds the socket path itself.
    Standalone,
}

/// Decoded wrapper environment.
#[derive(Debug, Clone)]
pub struct WrapperEnv {
    /// Orchestrator mode.
    pub orchestrator: OrchestratorMode,
    /// Key under which the inherited listener is advertised.
    pub socket_env_key: String,
    /// Socket path (diagnostic in launchd mode, bind target in standalone).
    pub socket_path: PathBuf,
    /// Working directory the daemon serves.
    pub cwd: PathBuf,
    /// Inactivity timeout.
    pub inactivity_timeout: Duration,
    /// MCP server command.
    pub command: String,
    /// MCP server arguments.
    pub args: Vec<String>,
    /// Explicit MCP server environment.
    pub server_env: HashMap<String, String>,
    /// Id the service definition was generated for.
    pub expected_id: String,
}

impl WrapperEnv {
    /// Decode the reserved contract from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if any required key is missing or malformed.
    pub fn from_env() -> DaemonResult<Self> {
        let orchestrator = match required(ENV_ORCHESTRATOR)?.as_str() {
            ORCHESTRATOR_LAUNCHD => OrchestratorMode::Launchd,
            ORCHESTRATOR_STANDALONE => OrchestratorMode::Standalone,
            other => {
                return Err(DaemonError::Environment(format!(
                    "unknown orchestrator mode: {other}"
                )));
            },
        };

        let timeout_ms: u64 = required(ENV_TIMEOUT)?.parse().map_err(|_| {
            DaemonError::Environment(format!("{ENV_TIMEOUT} is not a millisecond count"))
        })?;

        let args: Vec<String> = serde_json::from_str(&required(ENV_ARGS)?)
            .map_err(|e| DaemonError::Environment(format!("{ENV_ARGS} is not a JSON array: {e}")))?;

        let server_env: HashMap<String, String> = serde_json::from_str(&required(ENV_SERVER_ENV)?)
            .map_err(|e| {
                DaemonError::Environment(format!("{ENV_SERVER_ENV} is not a JSON object: {e}"))
            })?;

        Ok(Self {
            orchestrator,
            socket_env_key: required(ENV_SOCKET_ENV_KEY)?,
            socket_path: PathBuf::from(required(ENV_SOCKET_PATH)?),
            cwd: PathBuf::from(required(ENV_CWD)?),
            inactivity_timeout: Duration::from_millis(timeout_ms),
            command: required(ENV_COMMAND)?,
            args,
            server_env,
            expected_id: required(ENV_ID_EXPECTED)?,
        })
    }

    /// Recompute the identity and compare against the expected id.
    ///
    /// Guards against stale service definitions: if the plist was generated
    /// for different inputs than it now carries, the wrapper must not bind
    /// a socket or spawn anything.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::IdentityMismatch`] on any difference.
    pub fn verify_identity(&self) -> DaemonResult<DaemonIdentity> {
        let identity =
            DaemonIdentity::derive(&self.command, &self.args, &self.server_env, &self.cwd)?;
        if identity.id != self.expected_id {
            return Err(DaemonError::IdentityMismatch {
                expected: self.expected_id.clone(),
                computed: identity.id,
            });
        }
        Ok(identity)
    }

    /// Build the environment for the MCP child process: the ambient
    /// environment minus reserved keys, overlaid with the server env.
    #[must_use]
    pub fn child_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| !is_reserved_key(key))
            .collect();
        for (key, value) in &self.server_env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// The identity environment (explicit server env only, normalized).
    #[must_use]
    pub fn identity_env(&self) -> std::collections::BTreeMap<String, String> {
        derive_identity_env(&self.server_env)
    }
}

fn required(key: &str) -> DaemonResult<String> {
    std::env::var(key)
        .map_err(|_| DaemonError::Environment(format!("missing required variable {key}")))
}
