//! Per-working-directory scope: labels and on-disk layout.
//!
//! Every daemon is scoped to the project directory it serves. The layout:
//!
//! ```text
//! <cwd>/.mcpli/
//! ├── launchd/<label>.plist         (service definition, owned by ensure)
//! └── diagnostic-<id>.json          (debug/verbose flags for the wrapper)
//!
//! <tmp>/mcpli/<cwdHash>/<id>.sock   (listening socket, owned by launchd)
//! ```
//!
//! `label` is `com.mcpli.<cwdHash>.<id>`: unique per user, per working
//! directory, per daemon identity.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::identity::validate_id;

/// Label namespace prefix for all mcpli services.
pub const LABEL_NAMESPACE: &str = "com.mcpli";

/// A working-directory scope for daemon artifacts.
#[derive(Debug, Clone)]
pub struct Scope {
    cwd: PathBuf,
    cwd_hash: String,
    runtime_base: PathBuf,
}

impl Scope {
    /// Create a scope for an absolute working directory.
    ///
    /// The socket runtime base defaults to the system temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `cwd` is not absolute.
    pub fn new(cwd: impl Into<PathBuf>) -> CoreResult<Self> {
        Self::with_runtime_base(cwd, std::env::temp_dir())
    }

    /// Create a scope with an explicit runtime base (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if `cwd` is not absolute.
    pub fn with_runtime_base(
        cwd: impl Into<PathBuf>,
        runtime_base: impl Into<PathBuf>,
    ) -> CoreResult<Self> {
        let cwd = cwd.into();
        if !cwd.is_absolute() {
            return Err(CoreError::Validation(format!(
                "working directory must be absolute: {}",
                cwd.display()
            )));
        }
        let cwd_hash = hash_prefix(&cwd.display().to_string());
        Ok(Self {
            cwd,
            cwd_hash,
            runtime_base: runtime_base.into(),
        })
    }

    /// The scoped working directory.
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// First 8 hex chars of SHA-256 over the cwd string.
    #[must_use]
    pub fn cwd_hash(&self) -> &str {
        &self.cwd_hash
    }

    /// Service label for a daemon id: `com.mcpli.<cwdHash>.<id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` fails validation.
    pub fn label(&self, id: &str) -> CoreResult<String> {
        validate_id(id)?;
        Ok(format!("{LABEL_NAMESPACE}.{}.{id}", self.cwd_hash))
    }

    /// Label prefix shared by every daemon in this working directory.
    #[must_use]
    pub fn label_prefix(&self) -> String {
        format!("{LABEL_NAMESPACE}.{}.", self.cwd_hash)
    }

    /// Extract the daemon id from a label belonging to this scope.
    ///
    /// Returns `None` for labels outside this cwd's namespace or with an
    /// invalid id suffix.
    #[must_use]
    pub fn id_from_label(&self, label: &str) -> Option<String> {
        let id = label.strip_prefix(&self.label_prefix())?;
        validate_id(id).ok()?;
        Some(id.to_string())
    }

    /// Base directory for this cwd's sockets: `<tmp>/mcpli/<cwdHash>`.
    #[must_use]
    pub fn socket_dir(&self) -> PathBuf {
        self.runtime_base.join("mcpli").join(&self.cwd_hash)
    }

    /// Socket path for a daemon id.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` fails validation.
    pub fn socket_path(&self, id: &str) -> CoreResult<PathBuf> {
        validate_id(id)?;
        Ok(self.socket_dir().join(format!("{id}.sock")))
    }

    /// Project-local mcpli directory: `<cwd>/.mcpli`.
    #[must_use]
    pub fn project_dir(&self) -> PathBuf {
        self.cwd.join(".mcpli")
    }

    /// Directory holding service definitions: `<cwd>/.mcpli/launchd`.
    #[must_use]
    pub fn plist_dir(&self) -> PathBuf {
        self.project_dir().join("launchd")
    }

    /// Plist path for a daemon id.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` fails validation.
    pub fn plist_path(&self, id: &str) -> CoreResult<PathBuf> {
        let label = self.label(id)?;
        Ok(self.plist_dir().join(format!("{label}.plist")))
    }

    /// Diagnostic config path for a daemon id.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` fails validation.
    pub fn diagnostic_path(&self, id: &str) -> CoreResult<PathBuf> {
        validate_id(id)?;
        Ok(self.project_dir().join(format!("diagnostic-{id}.json")))
    }
}

/// First 8 hex chars of SHA-256 over a string.
fn hash_prefix(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(8);
    hex
}
