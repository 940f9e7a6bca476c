//! Per-daemon diagnostic configuration.
//!
//! The CLI writes `diagnostic-<id>.json` before ensure; the wrapper reads
//! it at startup to pick its log verbosity. The plist itself never pins
//! log destinations, so flipping these flags does not force a reload.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::fs::atomic_write;

/// Diagnostic flags shared between CLI and daemon wrapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticConfig {
    /// Emit debug-level structured logs.
    pub debug: bool,
    /// Mirror daemon logs to the OS log facility.
    pub logs: bool,
    /// Verbose client output.
    pub verbose: bool,
    /// Suppress non-essential client output.
    pub quiet: bool,
}

impl DiagnosticConfig {
    /// Atomically write the config to its per-id path.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &bytes, None)
    }

    /// Read the config, falling back to defaults when the file is missing
    /// or unreadable, since diagnostics must never stop a daemon from starting.
    #[must_use]
    pub fn read_or_default(path: &Path) -> Self {
        std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }
}
