//! launchctl driver.
//!
//! All orchestrator interaction funnels through here: state inspection via
//! `print`, lifecycle via `bootstrap`/`bootout`/`kickstart`, always against
//! the per-user `gui/<uid>` domain and always through an absolute binary
//! path (never PATH lookup).
//!
//! launchd is briefly inconsistent around reloads, so bootstrap and
//! kickstart retry with a short backoff; bootout is best-effort by design.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{LaunchdError, LaunchdResult};

/// Absolute path to the launchctl binary.
pub const LAUNCHCTL: &str = "/bin/launchctl";

/// Retry backoff per attempt for bootstrap/kickstart.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(150),
    Duration::from_millis(300),
    Duration::from_millis(450),
];

/// Captured output of one launchctl invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code (-1 when terminated by signal).
    pub status: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the invocation exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs launchctl invocations. The seam exists so the ensure engine can be
/// exercised against a scripted orchestrator in tests.
#[async_trait]
pub trait LaunchctlRunner: Send + Sync {
    /// Run launchctl with the given arguments.
    async fn run(&self, args: &[String]) -> LaunchdResult<CommandOutput>;
}

/// The real launchctl, spawned as a subprocess.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLaunchctl;

#[async_trait]
impl LaunchctlRunner for SystemLaunchctl {
    async fn run(&self, args: &[String]) -> LaunchdResult<CommandOutput> {
        if !Path::new(LAUNCHCTL).exists() {
            return Err(LaunchdError::OrchestratorUnavailable);
        }

        let output = tokio::process::Command::new(LAUNCHCTL)
            .args(args)
            .output()
            .await
            .map_err(LaunchdError::Spawn)?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Parsed daemon process state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningState {
    /// Whether launchd reports `state = running` with a pid.
    pub running: bool,
    /// The daemon's pid when running.
    pub pid: Option<i32>,
}

/// High-level launchctl operations over one `gui/<uid>` domain.
pub struct LaunchctlDriver {
    runner: Box<dyn LaunchctlRunner>,
    domain: String,
}

impl LaunchctlDriver {
    /// Driver for the invoking user's GUI domain using the system binary.
    #[must_use]
    pub fn system() -> Self {
        let uid = effective_uid();
        Self::with_runner(Box::new(SystemLaunchctl), format!("gui/{uid}"))
    }

    /// Driver with a custom runner and domain (tests).
    #[must_use]
    pub fn with_runner(runner: Box<dyn LaunchctlRunner>, domain: String) -> Self {
        Self { runner, domain }
    }

    /// The launchd domain this driver targets.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether a label is loaded: `launchctl print <domain>/<label>` exits 0.
    pub async fn is_loaded(&self, label: &str) -> bool {
        let args = vec![
            "print".to_string(),
            format!("{}/{label}", self.domain),
        ];
        match self.runner.run(&args).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(label, error = %e, "launchctl print failed");
                false
            },
        }
    }

    /// Read the daemon's running state from `launchctl print`.
    ///
    /// Requires both `state = running` and a numeric pid; anything else is
    /// reported as not running.
    pub async fn running_state(&self, label: &str) -> RunningState {
        let args = vec![
            "print".to_string(),
            format!("{}/{label}", self.domain),
        ];
        match self.runner.run(&args).await {
            Ok(output) if output.success() => parse_running_state(&output.stdout),
            _ => RunningState::default(),
        }
    }

    /// Load a service definition, retrying transient failures.
    ///
    /// A non-zero exit is re-checked against `is_loaded`: launchd sometimes
    /// reports a spurious error for a bootstrap that actually landed.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchdError::Retryable`] when all attempts fail and the
    /// label still is not loaded.
    pub async fn bootstrap(&self, label: &str, plist_path: &Path) -> LaunchdResult<()> {
        let args = vec![
            "bootstrap".to_string(),
            self.domain.clone(),
            plist_path.display().to_string(),
        ];

        let mut last_stderr = String::new();
        for (attempt, backoff) in RETRY_BACKOFF.iter().enumerate() {
            let output = self.runner.run(&args).await?;
            if output.success() {
                return Ok(());
            }
            if self.is_loaded(label).await {
                debug!(label, "bootstrap reported failure but label is loaded");
                return Ok(());
            }
            last_stderr = output.stderr;
            debug!(label, attempt, stderr = %last_stderr, "bootstrap retry");
            tokio::time::sleep(*backoff).await;
        }

        Err(LaunchdError::Retryable {
            operation: "bootstrap".to_string(),
            attempts: u32::try_from(RETRY_BACKOFF.len()).unwrap_or(u32::MAX),
            stderr: last_stderr,
        })
    }

    /// Unload a label. Best-effort: errors are logged and swallowed.
    pub async fn bootout(&self, label: &str) {
        let args = vec![
            "bootout".to_string(),
            format!("{}/{label}", self.domain),
        ];
        match self.runner.run(&args).await {
            Ok(output) if !output.success() => {
                debug!(label, stderr = %output.stderr, "bootout reported failure");
            },
            Err(e) => {
                debug!(label, error = %e, "bootout failed");
            },
            Ok(_) => {},
        }
    }

    /// Start a loaded job now, retrying transient failures.
    ///
    /// Failure is non-fatal: a socket-activated job still starts on the
    /// next client connection. Returns whether the kickstart landed.
    pub async fn kickstart(&self, label: &str, kill: bool) -> bool {
        let mut args = vec!["kickstart".to_string()];
        if kill {
            args.push("-k".to_string());
        }
        args.push(format!("{}/{label}", self.domain));

        for (attempt, backoff) in RETRY_BACKOFF.iter().enumerate() {
            match self.runner.run(&args).await {
                Ok(output) if output.success() => return true,
                Ok(output) => {
                    debug!(label, attempt, stderr = %output.stderr, "kickstart retry");
                },
                Err(e) => {
                    debug!(label, attempt, error = %e, "kickstart retry");
                },
            }
            tokio::time::sleep(*backoff).await;
        }

        warn!(label, "kickstart did not land; next connect will activate");
        false
    }
}

impl std::fmt::Debug for LaunchctlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchctlDriver")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Parse `launchctl print` output into a [`RunningState`].
#[must_use]
pub fn parse_running_state(output: &str) -> RunningState {
    let mut state_running = false;
    let mut pid = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("state =") {
            state_running = value.trim() == "running";
        } else if let Some(value) = line.strip_prefix("pid =") {
            pid = value.trim().parse::<i32>().ok();
        }
    }

    if state_running && pid.is_some() {
        RunningState { running: true, pid }
    } else {
        RunningState::default()
    }
}

fn effective_uid() -> u32 {
    #[cfg(unix)]
    {
        nix::unistd::Uid::effective().as_raw()
    }
    #[cfg(not(unix))]
    {
        0
    }
}
