//! IPC round trips over real Unix sockets.

mod common;

use std::sync::Arc;

use common::{IpcTestHarness, ParkedHandler, PongHandler};
use mcpli_ipc::{IpcClient, IpcMethod, IpcRequest, IpcResponse, ServerLimits};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

#[tokio::test]
async fn ping_round_trips_on_the_wire() {
    let harness = IpcTestHarness::start(ServerLimits::default(), Arc::new(PongHandler));

    // Exact wire contract: one JSON frame in, one JSON frame out, each
    // terminated by a single newline.
    let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();
    stream
        .write_all(b"{\"id\":\"r1\",\"method\":\"ping\"}\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    assert_eq!(raw, b"{\"id\":\"r1\",\"result\":\"pong\"}\n");

    harness.stop().await;
}

#[tokio::test]
async fn client_round_trips_through_the_typed_api() {
    let harness = IpcTestHarness::start(ServerLimits::default(), Arc::new(PongHandler));

    let client = IpcClient::new(&harness.socket_path);
    let request = IpcRequest::new(IpcMethod::Ping, None);
    let response = client
        .request(&request, std::time::Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response, IpcResponse::ok(request.id, serde_json::json!("pong")));

    harness.stop().await;
}

#[tokio::test]
async fn concurrent_clients_within_the_cap_all_succeed() {
    let limits = ServerLimits {
        max_connections: 16,
        ..ServerLimits::default()
    };
    let harness = IpcTestHarness::start(limits, Arc::new(PongHandler));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let client = IpcClient::new(&harness.socket_path);
        tasks.push(tokio::spawn(async move {
            let request = IpcRequest {
                id: format!("c{i}"),
                method: IpcMethod::Ping,
                params: None,
            };
            client
                .request(&request, std::time::Duration::from_secs(5))
                .await
        }));
    }

    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.result, Some(serde_json::json!("pong")));
    }

    harness.stop().await;
}

#[tokio::test]
async fn excess_connections_are_refused_without_a_response() {
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    let handler = ParkedHandler {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    };

    let limits = ServerLimits {
        max_connections: 1,
        ..ServerLimits::default()
    };
    let harness = IpcTestHarness::start(limits, Arc::new(handler));

    // Occupy the single slot.
    let mut occupant = UnixStream::connect(&harness.socket_path).await.unwrap();
    occupant
        .write_all(b"{\"id\":\"hold\",\"method\":\"ping\"}\n")
        .await
        .unwrap();
    entered.notified().await;

    // The next connection is accepted and immediately closed: EOF, no frame.
    let mut refused = UnixStream::connect(&harness.socket_path).await.unwrap();
    let mut raw = Vec::new();
    refused.read_to_end(&mut raw).await.unwrap();
    assert!(raw.is_empty());

    // Releasing the occupant frees the slot for new work.
    release.notify_one();
    let mut raw = Vec::new();
    occupant.read_to_end(&mut raw).await.unwrap();
    let response: IpcResponse = serde_json::from_slice(raw.trim_ascii_end()).unwrap();
    assert_eq!(response.result, Some(serde_json::json!("released")));

    let client = IpcClient::new(&harness.socket_path);
    let request = IpcRequest::new(IpcMethod::Ping, None);
    let response = client
        .request(&request, std::time::Duration::from_secs(5))
        .await
        .unwrap();
    assert!(response.result.is_some());

    harness.stop().await;
}

#[tokio::test]
async fn concatenated_frames_in_one_write_are_split_correctly() {
    let harness = IpcTestHarness::start(ServerLimits::default(), Arc::new(PongHandler));

    // Connections are one-shot: a second frame on the same connection is
    // ignored, but the first one must be answered correctly even when both
    // arrive in a single write.
    let mut stream = UnixStream::connect(&harness.socket_path).await.unwrap();
    stream
        .write_all(b"{\"id\":\"a\",\"method\":\"ping\"}\n{\"id\":\"b\",\"method\":\"ping\"}\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let response: IpcResponse = serde_json::from_slice(raw.trim_ascii_end()).unwrap();
    assert_eq!(response.id, "a");

    harness.stop().await;
}
