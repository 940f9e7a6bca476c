//! The daemon runtime: request dispatch, in-flight registry, inactivity.
//!
//! One [`DaemonRuntime`] serves every IPC connection of a wrapper process.
//! Request handling is cooperatively concurrent; the in-flight registry is
//! the single place cancellation tokens are registered and removed, keyed
//! by the opaque IPC request id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mcpli_core::sanitize::deep_sanitize;
use mcpli_core::timeout::{TimeoutConfig, TimeoutOverrides};
use mcpli_ipc::{IpcMethod, IpcRequest, IpcResponse, IpcServer, RequestHandler, ServerLimits};

use crate::env::{OrchestratorMode, WrapperEnv};
use crate::error::{DaemonError, DaemonResult};
use crate::session::McpSession;

/// The daemon's view of its MCP session. The seam exists so runtime
/// behavior (dispatch, cancellation, inactivity) is testable without a
/// child process.
#[async_trait]
pub trait ToolBackend: Send + Sync + 'static {
    /// Enumerate tools; the result is the `listTools` response payload.
    async fn list_tools(&self) -> DaemonResult<Value>;

    /// Invoke a tool bounded by `timeout`; the result is the `callTool`
    /// response payload.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> DaemonResult<Value>;

    /// Close the underlying session.
    async fn close(&self);
}

#[async_trait]
impl ToolBackend for McpSession {
    async fn list_tools(&self) -> DaemonResult<Value> {
        let tools = McpSession::list_tools(self).await?;
        Ok(json!({ "tools": tools }))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> DaemonResult<Value> {
        let result = McpSession::call_tool(self, name, arguments, timeout).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn close(&self) {
        McpSession::close(self).await;
    }
}

/// Shared runtime state of one wrapper process.
pub struct DaemonRuntime {
    backend: Arc<dyn ToolBackend>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    deadline: Mutex<tokio::time::Instant>,
    inactivity: Duration,
    tool_timeout: Duration,
    allow_shutdown: AtomicBool,
    shutdown: CancellationToken,
}

impl DaemonRuntime {
    /// Create a runtime around a backend.
    ///
    /// `shutdown` is shared with the IPC server: cancelling it stops the
    /// accept loop.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ToolBackend>,
        inactivity: Duration,
        tool_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            in_flight: Mutex::new(HashMap::new()),
            deadline: Mutex::new(advance(tokio::time::Instant::now(), inactivity)),
            inactivity,
            tool_timeout,
            allow_shutdown: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Whether the shutdown gate has been opened.
    ///
    /// Only the inactivity monitor and termination signals open it;
    /// anything else observing a closed gate must keep the daemon alive.
    #[must_use]
    pub fn allow_shutdown(&self) -> bool {
        self.allow_shutdown.load(Ordering::SeqCst)
    }

    /// Open the shutdown gate and stop the IPC server.
    pub fn begin_shutdown(&self, reason: &str) {
        info!(reason, "beginning daemon shutdown");
        self.allow_shutdown.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// Cancel every in-flight tool call (termination path).
    pub async fn cancel_all_in_flight(&self) {
        let mut in_flight = self.in_flight.lock().await;
        for (id, token) in in_flight.drain() {
            debug!(id, "cancelling in-flight call at shutdown");
            token.cancel();
        }
    }

    /// Number of tool calls currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Advance the inactivity deadline. Every inbound request lands here
    /// before dispatch.
    pub async fn touch(&self) {
        let mut deadline = self.deadline.lock().await;
        *deadline = advance(tokio::time::Instant::now(), self.inactivity);
    }

    /// Run the inactivity monitor until the deadline passes unrefreshed.
    pub fn spawn_inactivity_monitor(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let runtime = self;
        tokio::spawn(async move {
            loop {
                let deadline = *runtime.deadline.lock().await;
                if tokio::time::Instant::now() >= deadline {
                    runtime.begin_shutdown("inactivity timeout");
                    return;
                }
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {},
                    () = runtime.shutdown.cancelled() => return,
                }
            }
        })
    }

    async fn handle_ping(&self, request: &IpcRequest) -> IpcResponse {
        IpcResponse::ok(request.id.clone(), json!("pong"))
    }

    async fn handle_list_tools(&self, request: &IpcRequest) -> IpcResponse {
        match self.backend.list_tools().await {
            Ok(tools) => IpcResponse::ok(request.id.clone(), tools),
            Err(e) => IpcResponse::err(request.id.clone(), e.to_string()),
        }
    }

    async fn handle_call_tool(&self, request: &IpcRequest) -> IpcResponse {
        let params = match request.call_tool_params() {
            Ok(params) => params,
            Err(e) => {
                return IpcResponse::err(request.id.clone(), format!("invalid params: {e}"));
            },
        };

        let arguments = match params.arguments.as_ref().map(deep_sanitize).transpose() {
            Ok(arguments) => arguments,
            Err(e) => {
                return IpcResponse::err(request.id.clone(), format!("invalid params: {e}"));
            },
        };

        let token = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .insert(request.id.clone(), token.clone())
                .is_some()
            {
                warn!(id = request.id, "duplicate in-flight request id");
            }
        }

        let result = tokio::select! {
            result = self
                .backend
                .call_tool(&params.name, arguments, self.tool_timeout) => Some(result),
            () = token.cancelled() => None,
        };

        // The entry may already be gone if cancelCall raced us; either way
        // it must not outlive this handler.
        let still_registered = self.in_flight.lock().await.remove(&request.id).is_some();

        match result {
            Some(_) if !still_registered => {
                // Late completion for a call that was cancelled: drop it.
                debug!(id = request.id, "dropping result of cancelled call");
                IpcResponse::err(request.id.clone(), "request cancelled")
            },
            Some(Ok(value)) => IpcResponse::ok(request.id.clone(), value),
            Some(Err(e)) => IpcResponse::err(request.id.clone(), e.to_string()),
            None => {
                debug!(id = request.id, tool = params.name, "tool call cancelled");
                IpcResponse::err(request.id.clone(), "request cancelled")
            },
        }
    }

    async fn handle_cancel_call(&self, request: &IpcRequest) -> IpcResponse {
        let params = match request.cancel_call_params() {
            Ok(params) => params,
            Err(e) => {
                return IpcResponse::err(request.id.clone(), format!("invalid params: {e}"));
            },
        };

        let token = self
            .in_flight
            .lock()
            .await
            .remove(&params.ipc_request_id);
        let matched = token.is_some();
        if let Some(token) = token {
            info!(
                id = params.ipc_request_id,
                reason = params.reason.as_deref().unwrap_or("unspecified"),
                "cancelling in-flight call"
            );
            token.cancel();
        }

        // Reply immediately; the MCP layer is not awaited for an ack.
        IpcResponse::ok(request.id.clone(), json!({ "ok": true, "matched": matched }))
    }
}

#[async_trait]
impl RequestHandler for DaemonRuntime {
    async fn handle(&self, request: IpcRequest) -> IpcResponse {
        self.touch().await;

        match request.method {
            IpcMethod::Ping => self.handle_ping(&request).await,
            IpcMethod::ListTools => self.handle_list_tools(&request).await,
            IpcMethod::CallTool => self.handle_call_tool(&request).await,
            IpcMethod::CancelCall => self.handle_cancel_call(&request).await,
        }
    }
}

impl std::fmt::Debug for DaemonRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonRuntime")
            .field("inactivity", &self.inactivity)
            .field("tool_timeout", &self.tool_timeout)
            .field("allow_shutdown", &self.allow_shutdown)
            .finish_non_exhaustive()
    }
}

/// Run a wrapper process to completion: decode the environment, verify
/// identity, start the MCP session, serve IPC until shutdown.
///
/// # Errors
///
/// Returns an error on a broken environment contract, identity mismatch,
/// failed MCP handshake, or failed socket setup. Identity mismatch is
/// checked before any socket work.
pub async fn run() -> DaemonResult<()> {
    let wrapper_env = WrapperEnv::from_env()?;
    let identity = wrapper_env.verify_identity()?;

    info!(
        id = identity.id,
        command = identity.command,
        cwd = %wrapper_env.cwd.display(),
        "wrapper starting"
    );

    let session = Arc::new(
        McpSession::start(
            &identity.command,
            &identity.args,
            &wrapper_env.child_env(),
            &wrapper_env.cwd,
        )
        .await?,
    );

    let limits = ServerLimits::from_env();
    let server = match wrapper_env.orchestrator {
        // Orchestrator mode: the inherited descriptor is mandatory. If
        // launchd did not hand one over, something else owns the socket and
        // binding the path ourselves would shadow it.
        OrchestratorMode::Launchd => {
            IpcServer::from_activated(&wrapper_env.socket_env_key, limits)?
        },
        OrchestratorMode::Standalone => IpcServer::bind(&wrapper_env.socket_path, limits)?,
    };

    let timeouts = TimeoutConfig::resolve(&TimeoutOverrides::default());
    let runtime = DaemonRuntime::new(
        Arc::clone(&session) as Arc<dyn ToolBackend>,
        wrapper_env.inactivity_timeout,
        timeouts.tool,
        server.shutdown_token(),
    );

    let monitor = Arc::clone(&runtime).spawn_inactivity_monitor();
    let serve_task = tokio::spawn(server.serve(Arc::clone(&runtime) as Arc<dyn RequestHandler>));

    wait_for_termination(&runtime).await;

    runtime.cancel_all_in_flight().await;
    match serve_task.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => warn!(error = %e, "IPC server exited with error"),
        Err(e) => error!(error = %e, "IPC server task panicked"),
    }
    monitor.abort();

    session.close().await;
    info!("wrapper stopped");
    Ok(())
}

/// Block until a termination signal arrives or the runtime shuts itself
/// down (inactivity). Signals open the shutdown gate.
async fn wait_for_termination(runtime: &Arc<DaemonRuntime>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                runtime.shutdown.cancelled().await;
                return;
            },
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                runtime.shutdown.cancelled().await;
                return;
            },
        };

        tokio::select! {
            _ = sigterm.recv() => runtime.begin_shutdown("SIGTERM"),
            _ = sigint.recv() => runtime.begin_shutdown("SIGINT"),
            () = runtime.shutdown.cancelled() => {},
        }
    }
    #[cfg(not(unix))]
    {
        runtime.shutdown.cancelled().await;
    }
}

fn advance(from: tokio::time::Instant, by: Duration) -> tokio::time::Instant {
    from.checked_add(by).unwrap_or(from)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend whose calls hang until cancelled, for cancellation tests.
    struct HangingBackend;

    #[async_trait]
    impl ToolBackend for HangingBackend {
        async fn list_tools(&self) -> DaemonResult<Value> {
            Ok(json!({ "tools": [] }))
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Option<Value>,
            timeout: Duration,
        ) -> DaemonResult<Value> {
            tokio::time::sleep(timeout).await;
            Err(DaemonError::Tool("timed out".to_string()))
        }

        async fn close(&self) {}
    }

    /// Backend that answers instantly.
    struct InstantBackend;

    #[async_trait]
    impl ToolBackend for InstantBackend {
        async fn list_tools(&self) -> DaemonResult<Value> {
            Ok(json!({ "tools": [{ "name": "echo" }] }))
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Option<Value>,
            _timeout: Duration,
        ) -> DaemonResult<Value> {
            Ok(json!({ "name": name, "arguments": arguments }))
        }

        async fn close(&self) {}
    }

    fn runtime(backend: Arc<dyn ToolBackend>) -> Arc<DaemonRuntime> {
        DaemonRuntime::new(
            backend,
            Duration::from_secs(1800),
            Duration::from_secs(600),
            CancellationToken::new(),
        )
    }

    fn request(id: &str, method: IpcMethod, params: Option<Value>) -> IpcRequest {
        IpcRequest {
            id: id.to_string(),
            method,
            params,
        }
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let runtime = runtime(Arc::new(InstantBackend));
        let response = runtime.handle(request("r1", IpcMethod::Ping, None)).await;
        assert_eq!(response, IpcResponse::ok("r1", json!("pong")));
    }

    #[tokio::test]
    async fn call_tool_round_trips_through_backend() {
        let runtime = runtime(Arc::new(InstantBackend));
        let response = runtime
            .handle(request(
                "r2",
                IpcMethod::CallTool,
                Some(json!({"name": "echo", "arguments": {"text": "hi"}})),
            ))
            .await;
        assert_eq!(
            response.result.unwrap()["arguments"]["text"],
            json!("hi")
        );
        assert_eq!(runtime.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn call_tool_strips_unsafe_keys_before_dispatch() {
        let runtime = runtime(Arc::new(InstantBackend));
        let response = runtime
            .handle(request(
                "r2",
                IpcMethod::CallTool,
                Some(json!({
                    "name": "echo",
                    "arguments": {"__proto__": {"evil": true}, "ok": 1}
                })),
            ))
            .await;
        let args = &response.result.unwrap()["arguments"];
        assert_eq!(args["ok"], json!(1));
        assert!(args.get("__proto__").is_none());
    }

    #[tokio::test]
    async fn malformed_call_params_are_rejected() {
        let runtime = runtime(Arc::new(InstantBackend));
        let response = runtime
            .handle(request(
                "r2",
                IpcMethod::CallTool,
                Some(json!({"no_name_here": true})),
            ))
            .await;
        assert!(response.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_call_interrupts_in_flight_request() {
        let runtime = runtime(Arc::new(HangingBackend));

        let call_runtime = Arc::clone(&runtime);
        let call = tokio::spawn(async move {
            call_runtime
                .handle(request(
                    "r2",
                    IpcMethod::CallTool,
                    Some(json!({"name": "slow"})),
                ))
                .await
        });

        // Let the call register itself.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runtime.in_flight_count().await, 1);

        let cancel = runtime
            .handle(request(
                "r3",
                IpcMethod::CancelCall,
                Some(json!({"ipcRequestId": "r2", "reason": "aborted"})),
            ))
            .await;
        assert_eq!(
            cancel,
            IpcResponse::ok("r3", json!({"ok": true, "matched": true}))
        );

        let response = call.await.unwrap();
        assert!(response.is_err());
        assert_eq!(runtime.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_of_unknown_request_reports_unmatched() {
        let runtime = runtime(Arc::new(InstantBackend));
        let response = runtime
            .handle(request(
                "r3",
                IpcMethod::CancelCall,
                Some(json!({"ipcRequestId": "ghost"})),
            ))
            .await;
        assert_eq!(
            response,
            IpcResponse::ok("r3", json!({"ok": true, "matched": false}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_opens_the_gate_and_stops_the_server() {
        let shutdown = CancellationToken::new();
        let runtime = DaemonRuntime::new(
            Arc::new(InstantBackend),
            Duration::from_secs(2),
            Duration::from_secs(600),
            shutdown.clone(),
        );
        assert!(!runtime.allow_shutdown());

        let monitor = Arc::clone(&runtime).spawn_inactivity_monitor();
        tokio::time::sleep(Duration::from_secs(3)).await;
        monitor.await.unwrap();

        assert!(runtime.allow_shutdown());
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_push_the_deadline_back() {
        let shutdown = CancellationToken::new();
        let runtime = DaemonRuntime::new(
            Arc::new(InstantBackend),
            Duration::from_secs(2),
            Duration::from_secs(600),
            shutdown.clone(),
        );
        let monitor = Arc::clone(&runtime).spawn_inactivity_monitor();

        // Keep touching just inside the window; the monitor must not fire.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            runtime
                .handle(request("r", IpcMethod::Ping, None))
                .await;
        }
        assert!(!shutdown.is_cancelled());

        // Now go silent past the window.
        tokio::time::sleep(Duration::from_secs(3)).await;
        monitor.await.unwrap();
        assert!(shutdown.is_cancelled());
    }
}
