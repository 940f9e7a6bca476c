//! MCPLI daemon - the long-lived wrapper process.
//!
//! launchd (or the standalone orchestrator) spawns this wrapper on the
//! first client connection. It recomputes the daemon identity from its
//! environment, refuses to serve a stale service definition, starts one
//! MCP stdio session, and answers IPC requests until the inactivity
//! timeout or a termination signal ends it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod env;
pub mod error;
pub mod session;
pub mod wrapper;

pub use env::{OrchestratorMode, WrapperEnv};
pub use error::{DaemonError, DaemonResult};
pub use session::McpSession;
pub use wrapper::{DaemonRuntime, ToolBackend, run};
