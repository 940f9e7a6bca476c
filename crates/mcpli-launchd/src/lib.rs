//! MCPLI launchd - service definitions and lifecycle reconcile.
//!
//! This crate provides:
//! - A deterministic plist builder: byte-equal inputs produce byte-equal
//!   service definitions, which is what makes reloads cheap to detect
//! - A launchctl driver with bounded retries over the `gui/<uid>` domain
//! - The ensure engine: the idempotent client-side reconcile that keeps a
//!   daemon's service definition in sync with the current inputs

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod ensure;
pub mod error;
pub mod launchctl;
pub mod plist;

pub use ensure::{EnsureEngine, EnsureOptions, EnsureOutcome, UpdateAction};
pub use error::{LaunchdError, LaunchdResult};
pub use launchctl::{
    CommandOutput, LaunchctlDriver, LaunchctlRunner, RunningState, SystemLaunchctl,
};
pub use plist::{SOCKET_KEY, ServiceDefinition};
