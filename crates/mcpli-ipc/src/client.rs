//! The IPC client: one framed request, one framed response.
//!
//! Connecting tolerates a daemon that launchd is still spawning: `ENOENT`
//! and `ECONNREFUSED` are retried with a short backoff until the budget is
//! spent. After an ensure that (re)loaded the service definition the caller
//! raises the budget for that single call, covering the brief window where
//! launchd rebinds the socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mcpli_core::timeout::{DEFAULT_CONNECT_RETRY_BUDGET, RELOAD_CONNECT_RETRY_BUDGET};

use crate::error::{IpcError, IpcResult};
use crate::framing::{FrameDecoder, FrameEvent, encode_frame};
use crate::protocol::{CancelCallParams, IpcMethod, IpcRequest, IpcResponse};

/// Per-attempt backoff starts here and grows linearly.
const BACKOFF_STEP: Duration = Duration::from_millis(25);
/// Per-attempt backoff cap.
const BACKOFF_CAP: Duration = Duration::from_millis(200);
/// Budget for the best-effort secondary `cancelCall` connection.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(2);
/// Response buffer bound; a daemon reply should never get near this.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Connect retry budget for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectBudget(pub Duration);

impl ConnectBudget {
    /// The standard budget.
    #[must_use]
    pub fn standard() -> Self {
        Self(DEFAULT_CONNECT_RETRY_BUDGET)
    }

    /// The raised budget for the first call after a (re)load or fresh start.
    #[must_use]
    pub fn after_reload() -> Self {
        Self(RELOAD_CONNECT_RETRY_BUDGET)
    }
}

/// Client for a single daemon socket.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    connect_budget: Duration,
}

impl IpcClient {
    /// Create a client with the standard connect budget.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_budget: DEFAULT_CONNECT_RETRY_BUDGET,
        }
    }

    /// Override the connect retry budget for this client.
    #[must_use]
    pub fn with_connect_budget(mut self, budget: ConnectBudget) -> Self {
        self.connect_budget = budget.0;
        self
    }

    /// The socket path this client dials.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and await its response.
    ///
    /// `timeout` bounds the whole exchange after the connection is
    /// established; connecting is bounded separately by the retry budget.
    ///
    /// # Errors
    ///
    /// Returns an error on connect-budget exhaustion, frame violations, or
    /// timeout. A daemon-side error *response* is returned as `Ok`; the
    /// caller decides how to surface it.
    pub async fn request(&self, request: &IpcRequest, timeout: Duration) -> IpcResult<IpcResponse> {
        let stream = self.connect_with_retry().await?;
        match tokio::time::timeout(timeout, exchange(stream, request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(IpcError::Timeout(timeout)),
        }
    }

    /// Send one request, honoring a cancellation token.
    ///
    /// If `cancel` fires before the request is written, no socket is
    /// opened. If it fires mid-flight, a best-effort `cancelCall` is sent
    /// on a secondary connection and the original call fails with
    /// [`IpcError::Cancelled`] regardless of any late response.
    ///
    /// # Errors
    ///
    /// As [`IpcClient::request`], plus [`IpcError::Cancelled`].
    pub async fn request_with_cancel(
        &self,
        request: &IpcRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> IpcResult<IpcResponse> {
        if cancel.is_cancelled() {
            return Err(IpcError::Cancelled);
        }

        tokio::select! {
            result = self.request(request, timeout) => result,
            () = cancel.cancelled() => {
                self.send_cancel(&request.id, "aborted").await;
                Err(IpcError::Cancelled)
            },
        }
    }

    /// Fire a best-effort `cancelCall` for an in-flight request id.
    pub async fn send_cancel(&self, ipc_request_id: &str, reason: &str) {
        let params = CancelCallParams {
            ipc_request_id: ipc_request_id.to_string(),
            reason: Some(reason.to_string()),
        };
        let request = IpcRequest::new(
            IpcMethod::CancelCall,
            serde_json::to_value(params).ok(),
        );

        let outcome = tokio::time::timeout(CANCEL_TIMEOUT, async {
            let stream = UnixStream::connect(&self.socket_path).await?;
            exchange(stream, &request).await
        })
        .await;

        match outcome {
            Ok(Ok(response)) => {
                debug!(id = ipc_request_id, ?response, "cancelCall delivered");
            },
            Ok(Err(e)) => {
                debug!(id = ipc_request_id, error = %e, "cancelCall failed");
            },
            Err(_elapsed) => {
                debug!(id = ipc_request_id, "cancelCall timed out");
            },
        }
    }

    /// Connect, retrying `ENOENT`/`ECONNREFUSED` within the budget.
    async fn connect_with_retry(&self) -> IpcResult<UnixStream> {
        let start = tokio::time::Instant::now();
        let mut backoff = BACKOFF_STEP;
        let mut last_error: Option<std::io::Error> = None;

        loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) if is_retryable_connect_error(&e) => {
                    let spent = start.elapsed();
                    if spent >= self.connect_budget {
                        last_error = Some(e);
                        break;
                    }
                    debug!(
                        path = %self.socket_path.display(),
                        error = %e,
                        backoff = ?backoff,
                        "connect retry"
                    );
                    let remaining = self.connect_budget.saturating_sub(spent);
                    tokio::time::sleep(backoff.min(remaining)).await;
                    backoff = BACKOFF_CAP.min(backoff.saturating_add(BACKOFF_STEP));
                },
                Err(e) => {
                    last_error = Some(e);
                    break;
                },
            }
        }

        Err(IpcError::ConnectFailure {
            path: self.socket_path.display().to_string(),
            budget_ms: self.connect_budget.as_millis(),
            reason: last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
        })
    }
}

/// Connection-refused and not-found mean "the daemon is not there yet".
fn is_retryable_connect_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
    )
}

/// Write the framed request, half-close, read the single framed response.
async fn exchange(mut stream: UnixStream, request: &IpcRequest) -> IpcResult<IpcResponse> {
    let frame = encode_frame(request)?;
    stream.write_all(&frame).await?;
    stream.shutdown().await?;

    let mut decoder = FrameDecoder::new(MAX_RESPONSE_BYTES.saturating_sub(1), MAX_RESPONSE_BYTES);
    let mut chunk = vec![0u8; 16 * 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(IpcError::Frame(
                "connection closed before a response arrived".to_string(),
            ));
        }
        for event in decoder.push(&chunk[..n])? {
            match event {
                FrameEvent::Frame(frame) => {
                    let response: IpcResponse = serde_json::from_slice(&frame)?;
                    return Ok(response);
                },
                FrameEvent::Oversize { buffered } => {
                    return Err(IpcError::Frame(format!(
                        "response frame exceeded {buffered} bytes"
                    )));
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_are_classified() {
        use std::io::{Error, ErrorKind};
        assert!(is_retryable_connect_error(&Error::from(
            ErrorKind::ConnectionRefused
        )));
        assert!(is_retryable_connect_error(&Error::from(ErrorKind::NotFound)));
        assert!(!is_retryable_connect_error(&Error::from(
            ErrorKind::PermissionDenied
        )));
    }

    #[test]
    fn budgets_match_contract() {
        assert_eq!(ConnectBudget::standard().0, Duration::from_millis(3000));
        assert_eq!(ConnectBudget::after_reload().0, Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn connect_failure_reports_budget_and_reason() {
        let dir = tempfile::tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("absent.sock"))
            .with_connect_budget(ConnectBudget(Duration::from_millis(50)));

        let request = IpcRequest::new(IpcMethod::Ping, None);
        let err = client
            .request(&request, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            IpcError::ConnectFailure { budget_ms, .. } => assert_eq!(budget_ms, 50),
            other => panic!("expected connect failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn pre_wire_cancellation_opens_no_socket() {
        let dir = tempfile::tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("absent.sock"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = IpcRequest::new(IpcMethod::Ping, None);
        let err = client
            .request_with_cancel(&request, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Cancelled));
    }
}
