//! MCPLI IPC - line-delimited JSON over Unix-domain sockets.
//!
//! This crate provides:
//! - The wire protocol: one `\n`-terminated JSON frame per request/response
//! - An IPC server that serves either a launchd-inherited listener (socket
//!   activation) or a freshly bound socket path
//! - An IPC client with a connect retry budget and mid-flight cancellation
//! - Tunable, clamped resource limits (connections, idle timeout, frame size)
//!
//! Each connection is strictly one-shot: the client writes a single framed
//! request, half-closes, and reads a single framed response.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod activation;
pub mod client;
pub mod error;
pub mod framing;
pub mod limits;
pub mod protocol;
pub mod server;

pub use client::{ConnectBudget, IpcClient};
pub use error::{IpcError, IpcResult};
pub use framing::{FrameDecoder, encode_frame};
pub use limits::ServerLimits;
pub use protocol::{CallToolParams, CancelCallParams, IpcMethod, IpcRequest, IpcResponse};
pub use server::{IpcServer, RequestHandler};
