//! The ensure engine: idempotent reconcile of a daemon's service definition.
//!
//! Every client invocation runs ensure before talking to the daemon. The
//! engine renders the plist for the current inputs, compares bytes with
//! what is on disk, and only touches launchd when something actually
//! changed: identical inputs must produce zero lifecycle churn.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use mcpli_core::Scope;
use mcpli_core::env::{
    ENV_ARGS, ENV_COMMAND, ENV_CWD, ENV_ID_EXPECTED, ENV_ORCHESTRATOR, ENV_SERVER_ENV,
    ENV_SOCKET_ENV_KEY, ENV_SOCKET_PATH, ENV_TIMEOUT, ORCHESTRATOR_LAUNCHD,
};
use mcpli_core::fs::{atomic_write, secure_create_dir_all, secure_socket_dir};
use mcpli_core::identity::DaemonIdentity;
use mcpli_core::timeout::DEFAULT_INACTIVITY;

use crate::error::LaunchdResult;
use crate::launchctl::LaunchctlDriver;
use crate::plist::{SOCKET_KEY, ServiceDefinition};

/// How long to wait for the socket path after a (re)load.
const SOCKET_WAIT: Duration = Duration::from_millis(500);
/// Poll interval while waiting for the socket path.
const SOCKET_POLL: Duration = Duration::from_millis(50);

/// What ensure did to the service definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Definition was written and the job freshly loaded.
    Loaded,
    /// Definition changed; the job was booted out and loaded again.
    Reloaded,
    /// Definition already matched and the job was loaded.
    Unchanged,
}

impl UpdateAction {
    /// Whether this action (re)loaded the job. Callers raise their connect
    /// retry budget for the immediately following call when it did.
    #[must_use]
    pub fn reloaded(self) -> bool {
        matches!(self, Self::Loaded | Self::Reloaded)
    }
}

/// Options controlling one ensure pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureOptions {
    /// Kickstart the daemon instead of waiting for the first connection.
    pub prefer_immediate_start: bool,
    /// Explicit inactivity timeout. `None` preserves the value from a
    /// prior plist (so unrelated calls never force a reload), falling back
    /// to the built-in default.
    pub inactivity_timeout: Option<Duration>,
}

/// Result of one ensure pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    /// Daemon id.
    pub id: String,
    /// Service label.
    pub label: String,
    /// Socket path clients connect to.
    pub socket_path: PathBuf,
    /// What happened to the service definition.
    pub update_action: UpdateAction,
    /// Whether a kickstart landed during this pass.
    pub started: bool,
    /// Daemon pid, when running.
    pub pid: Option<i32>,
}

/// Reconciles service definitions for one working-directory scope.
pub struct EnsureEngine {
    scope: Scope,
    driver: LaunchctlDriver,
    binary_path: PathBuf,
}

impl EnsureEngine {
    /// Create an engine.
    ///
    /// `binary_path` is the absolute path of the mcpli binary launchd will
    /// execute as `mcpli daemon run`.
    #[must_use]
    pub fn new(scope: Scope, driver: LaunchctlDriver, binary_path: PathBuf) -> Self {
        Self {
            scope,
            driver,
            binary_path,
        }
    }

    /// The scope this engine reconciles.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The launchctl driver.
    #[must_use]
    pub fn driver(&self) -> &LaunchctlDriver {
        &self.driver
    }

    /// Reconcile the service definition for `identity` and report state.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be secured, the plist cannot
    /// be written, or a required bootstrap keeps failing.
    pub async fn ensure(
        &self,
        identity: &DaemonIdentity,
        options: &EnsureOptions,
    ) -> LaunchdResult<EnsureOutcome> {
        let id = identity.id.as_str();
        let label = self.scope.label(id)?;
        let plist_path = self.scope.plist_path(id)?;
        let socket_path = self.scope.socket_path(id)?;

        secure_create_dir_all(&self.scope.project_dir())?;
        secure_create_dir_all(&self.scope.plist_dir())?;
        secure_socket_dir(&self.scope.socket_dir())?;

        let prior = std::fs::read(&plist_path).ok();

        let timeout_ms = self.resolve_timeout_ms(options, prior.as_deref());
        let definition = self.build_definition(identity, &label, &socket_path, timeout_ms)?;
        let rendered = definition.render().into_bytes();

        let was_loaded = self.driver.is_loaded(&label).await;

        let update_action = if prior.as_deref() == Some(rendered.as_slice()) {
            if was_loaded {
                UpdateAction::Unchanged
            } else {
                self.driver.bootstrap(&label, &plist_path).await?;
                UpdateAction::Loaded
            }
        } else {
            atomic_write(&plist_path, &rendered, None)?;
            if was_loaded {
                self.driver.bootout(&label).await;
                self.driver.bootstrap(&label, &plist_path).await?;
                UpdateAction::Reloaded
            } else {
                self.driver.bootstrap(&label, &plist_path).await?;
                UpdateAction::Loaded
            }
        };

        debug!(label, action = ?update_action, "service definition reconciled");

        // launchd rebinds the socket asynchronously after a (re)load; give
        // it a moment so the first client connect does not race the bind.
        wait_for_socket(&socket_path).await;

        let state = self.driver.running_state(&label).await;

        let started = if !options.prefer_immediate_start {
            false
        } else if update_action.reloaded() || !state.running {
            self.driver.kickstart(&label, false).await
        } else {
            false
        };

        let state = if started {
            self.driver.running_state(&label).await
        } else {
            state
        };

        info!(
            id,
            label,
            action = ?update_action,
            started,
            pid = state.pid,
            "ensure complete"
        );

        Ok(EnsureOutcome {
            id: id.to_string(),
            label,
            socket_path,
            update_action,
            started,
            pid: state.pid,
        })
    }

    /// Resolve the inactivity timeout for the plist, in milliseconds.
    ///
    /// Explicit wins; otherwise a prior plist's value is preserved so calls
    /// that do not mention timeouts never force a reload.
    fn resolve_timeout_ms(&self, options: &EnsureOptions, prior: Option<&[u8]>) -> u64 {
        if let Some(explicit) = options.inactivity_timeout {
            return u64::try_from(explicit.as_millis()).unwrap_or(u64::MAX);
        }

        if let Some(prior) = prior {
            let text = String::from_utf8_lossy(prior);
            if let Some(value) = ServiceDefinition::read_env_value(&text, ENV_TIMEOUT) {
                if let Ok(ms) = value.parse::<u64>() {
                    return ms;
                }
            }
        }

        u64::try_from(DEFAULT_INACTIVITY.as_millis()).unwrap_or(u64::MAX)
    }

    /// Build the service definition for an identity.
    fn build_definition(
        &self,
        identity: &DaemonIdentity,
        label: &str,
        socket_path: &std::path::Path,
        timeout_ms: u64,
    ) -> LaunchdResult<ServiceDefinition> {
        let mut env: BTreeMap<String, String> = identity
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        env.insert(
            ENV_ORCHESTRATOR.to_string(),
            ORCHESTRATOR_LAUNCHD.to_string(),
        );
        env.insert(ENV_SOCKET_ENV_KEY.to_string(), SOCKET_KEY.to_string());
        env.insert(
            ENV_SOCKET_PATH.to_string(),
            socket_path.display().to_string(),
        );
        env.insert(
            ENV_CWD.to_string(),
            self.scope.cwd().display().to_string(),
        );
        env.insert(ENV_TIMEOUT.to_string(), timeout_ms.to_string());
        env.insert(ENV_COMMAND.to_string(), identity.command.clone());
        env.insert(ENV_ARGS.to_string(), serde_json::to_string(&identity.args)?);
        env.insert(
            ENV_SERVER_ENV.to_string(),
            serde_json::to_string(&identity.env)?,
        );
        env.insert(ENV_ID_EXPECTED.to_string(), identity.id.clone());

        Ok(ServiceDefinition {
            label: label.to_string(),
            program_arguments: vec![
                self.binary_path.display().to_string(),
                "daemon".to_string(),
                "run".to_string(),
            ],
            working_directory: self.scope.cwd().to_path_buf(),
            env,
            socket_path: socket_path.to_path_buf(),
        })
    }
}

impl std::fmt::Debug for EnsureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsureEngine")
            .field("scope", &self.scope)
            .field("binary_path", &self.binary_path)
            .finish_non_exhaustive()
    }
}

/// Best-effort poll for the socket path, bounded by [`SOCKET_WAIT`].
async fn wait_for_socket(socket_path: &std::path::Path) {
    let mut waited = Duration::ZERO;
    while waited < SOCKET_WAIT {
        if socket_path.exists() {
            return;
        }
        tokio::time::sleep(SOCKET_POLL).await;
        waited = waited.saturating_add(SOCKET_POLL);
    }
}
