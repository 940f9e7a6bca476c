//! MCPLI Core - Foundation types for the mcpli daemon framework.
//!
//! This crate provides:
//! - Daemon identity derivation from normalized (command, args, env) inputs
//! - Per-working-directory scope: labels, socket paths, plist paths
//! - Filesystem hygiene: secure directories, atomic writes, safe unlink
//! - Layered timeout configuration
//! - Deep sanitization of untrusted JSON parameters

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod diagnostics;
pub mod env;
pub mod error;
pub mod fs;
pub mod identity;
pub mod sanitize;
pub mod scope;
pub mod timeout;

pub use diagnostics::DiagnosticConfig;
pub use error::{CoreError, CoreResult};
pub use identity::{
    DaemonIdentity, compute_id, derive_identity_env, normalize_command, normalize_env, validate_id,
};
pub use sanitize::{deep_sanitize, is_unsafe_key};
pub use scope::Scope;
pub use timeout::{TimeoutConfig, TimeoutOverrides, effective_ipc_timeout};
