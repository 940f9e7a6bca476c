//! End-to-end daemon dispatch over a real socket: the `DaemonRuntime`
//! behind an `IpcServer`, driven by the `IpcClient`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcpli_daemon::{DaemonResult, DaemonRuntime, ToolBackend};
use mcpli_ipc::{
    IpcClient, IpcError, IpcMethod, IpcRequest, IpcServer, RequestHandler, ServerLimits,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Backend that hangs on a named tool and answers instantly otherwise.
struct SlowEchoBackend;

#[async_trait]
impl ToolBackend for SlowEchoBackend {
    async fn list_tools(&self) -> DaemonResult<Value> {
        Ok(json!({"tools": [{"name": "echo"}, {"name": "slow"}]}))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        _timeout: Duration,
    ) -> DaemonResult<Value> {
        if name == "slow" {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(json!({
            "content": [{"type": "text", "text": format!("echo: {arguments:?}")}]
        }))
    }

    async fn close(&self) {}
}

struct Running {
    #[allow(dead_code)]
    dir: TempDir,
    socket_path: std::path::PathBuf,
    runtime: Arc<DaemonRuntime>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<Result<(), IpcError>>,
}

fn start_daemon() -> Running {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket_path = dir.path().join("s").join("daemon.sock");

    let server = IpcServer::bind(&socket_path, ServerLimits::default()).expect("bind");
    let shutdown = server.shutdown_token();

    let runtime = DaemonRuntime::new(
        Arc::new(SlowEchoBackend),
        Duration::from_secs(1800),
        Duration::from_secs(600),
        shutdown.clone(),
    );

    let handler = Arc::clone(&runtime) as Arc<dyn RequestHandler>;
    let server = tokio::spawn(server.serve(handler));

    Running {
        dir,
        socket_path,
        runtime,
        shutdown,
        server,
    }
}

#[tokio::test]
async fn ping_and_list_tools_round_trip() {
    let daemon = start_daemon();
    let client = IpcClient::new(&daemon.socket_path);

    let response = client
        .request(
            &IpcRequest::new(IpcMethod::Ping, None),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.result, Some(json!("pong")));

    let response = client
        .request(
            &IpcRequest::new(IpcMethod::ListTools, None),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    let tools = response.result.unwrap();
    assert_eq!(tools["tools"].as_array().unwrap().len(), 2);

    daemon.shutdown.cancel();
    let _ = daemon.server.await;
}

#[tokio::test]
async fn aborted_call_cancels_via_secondary_connection() {
    let daemon = start_daemon();
    let client = IpcClient::new(&daemon.socket_path);

    let request = IpcRequest {
        id: "r2".to_string(),
        method: IpcMethod::CallTool,
        params: Some(json!({"name": "slow"})),
    };

    // Abort 100ms into the call, like a user hitting ctrl-c.
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = client
        .request_with_cancel(&request, Duration::from_secs(30), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, IpcError::Cancelled));

    // The daemon dropped the in-flight entry; the call is gone, not stuck.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if daemon.runtime.in_flight_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("in-flight entry should drain after cancellation");

    // The daemon still serves new requests afterwards.
    let response = client
        .request(
            &IpcRequest::new(IpcMethod::Ping, None),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.result, Some(json!("pong")));

    daemon.shutdown.cancel();
    let _ = daemon.server.await;
}

#[tokio::test]
async fn cancel_of_finished_call_reports_unmatched() {
    let daemon = start_daemon();
    let client = IpcClient::new(&daemon.socket_path);

    let call = IpcRequest {
        id: "r9".to_string(),
        method: IpcMethod::CallTool,
        params: Some(json!({"name": "echo", "arguments": {"text": "hi"}})),
    };
    let response = client.request(&call, Duration::from_secs(5)).await.unwrap();
    assert!(response.result.is_some());

    // Cancelling after completion is a no-op with matched=false.
    let cancel = IpcRequest {
        id: "r10".to_string(),
        method: IpcMethod::CancelCall,
        params: Some(json!({"ipcRequestId": "r9", "reason": "too late"})),
    };
    let response = client.request(&cancel, Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        response.result,
        Some(json!({"ok": true, "matched": false}))
    );

    daemon.shutdown.cancel();
    let _ = daemon.server.await;
}

#[tokio::test]
async fn unsafe_keys_are_stripped_before_the_backend_sees_them() {
    let daemon = start_daemon();
    let client = IpcClient::new(&daemon.socket_path);

    let call = IpcRequest {
        id: "r11".to_string(),
        method: IpcMethod::CallTool,
        params: Some(json!({
            "name": "echo",
            "arguments": {"__proto__": {"polluted": true}, "ok": 1}
        })),
    };
    let response = client.request(&call, Duration::from_secs(5)).await.unwrap();
    let text = response.result.unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(text.contains("ok"));
    assert!(!text.contains("__proto__"));

    daemon.shutdown.cancel();
    let _ = daemon.server.await;
}
