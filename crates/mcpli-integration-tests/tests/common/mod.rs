//! Shared test harness for IPC integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use mcpli_ipc::{IpcRequest, IpcResponse, IpcServer, RequestHandler, ServerLimits};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A serving IPC socket in a scratch directory.
///
/// Owns the `TempDir` so the socket's parent survives for the whole test;
/// dropping the harness cancels the server.
pub struct IpcTestHarness {
    /// Scratch directory (held to prevent cleanup).
    #[allow(dead_code)]
    pub dir: TempDir,
    /// Path clients connect to.
    pub socket_path: PathBuf,
    /// Cancels the accept loop.
    pub shutdown: CancellationToken,
    /// The serving task.
    pub server: tokio::task::JoinHandle<Result<(), mcpli_ipc::IpcError>>,
}

impl IpcTestHarness {
    /// Bind a server in a fresh tempdir and start serving `handler`.
    pub fn start(limits: ServerLimits, handler: Arc<dyn RequestHandler>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("sockets").join("daemon.sock");

        let server = IpcServer::bind(&socket_path, limits).expect("bind");
        let shutdown = server.shutdown_token();
        let server = tokio::spawn(server.serve(handler));

        Self {
            dir,
            socket_path,
            shutdown,
            server,
        }
    }

    /// Stop the server and wait for the accept loop to drain.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

/// Handler that answers `pong` to everything, echoing the request id.
pub struct PongHandler;

#[async_trait::async_trait]
impl RequestHandler for PongHandler {
    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        IpcResponse::ok(request.id, serde_json::json!("pong"))
    }
}

/// Handler that parks until released, to hold a connection slot open.
pub struct ParkedHandler {
    /// Released once a request has entered the handler.
    pub entered: Arc<tokio::sync::Notify>,
    /// Handlers park on this until the test releases them.
    pub release: Arc<tokio::sync::Notify>,
}

#[async_trait::async_trait]
impl RequestHandler for ParkedHandler {
    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        self.entered.notify_one();
        self.release.notified().await;
        IpcResponse::ok(request.id, serde_json::json!("released"))
    }
}
