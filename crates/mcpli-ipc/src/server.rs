//! The IPC server: accept loop, per-connection handlers, limits.
//!
//! Two construction modes mirror the two orchestrator modes:
//! - [`IpcServer::from_activated`] adopts the launchd-inherited listener
//!   (socket activation); there is no fallback in that mode.
//! - [`IpcServer::bind`] binds a fresh socket path with a hardened parent
//!   directory, a 0o177 umask around the bind, and a 0600 socket mode.
//!
//! Each accepted connection services exactly one framed request. Excess
//! connections beyond `max_connections` are accepted and immediately closed
//! without any work; connections that fail to deliver a complete frame
//! within the idle window are dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use mcpli_core::fs::{safe_unlink, secure_socket_dir};

use crate::activation::take_activated_listener;
use crate::error::{IpcError, IpcResult};
use crate::framing::{FrameDecoder, FrameEvent, encode_frame};
use crate::limits::ServerLimits;
use crate::protocol::{IpcRequest, IpcResponse};

/// Grace period for in-flight handlers during shutdown.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Read chunk size for connection buffers.
const READ_CHUNK: usize = 16 * 1024;

/// Handles one decoded request and produces the response to write back.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle a single request. Must not panic on malformed params; return
    /// an error response instead.
    async fn handle(&self, request: IpcRequest) -> IpcResponse;
}

/// A serving Unix-domain socket.
pub struct IpcServer {
    listener: UnixListener,
    limits: ServerLimits,
    bound_path: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl IpcServer {
    /// Adopt the orchestrator-inherited listener under `socket_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if no descriptor is advertised under that key.
    /// This is fatal in orchestrator mode: there is no path fallback.
    pub fn from_activated(socket_key: &str, limits: ServerLimits) -> IpcResult<Self> {
        let std_listener = take_activated_listener(socket_key)?;
        let listener = UnixListener::from_std(std_listener).map_err(IpcError::Io)?;
        info!(key = socket_key, "adopted activated listener");
        Ok(Self {
            listener,
            limits,
            bound_path: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind a fresh socket at `path` (standalone mode).
    ///
    /// The parent directory is hardened first, any stale socket is
    /// unlinked, the bind itself happens under a 0o177 umask, and the
    /// resulting path is chmod'd to 0600.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory is unsafe or the bind
    /// fails.
    pub fn bind(path: &Path, limits: ServerLimits) -> IpcResult<Self> {
        let parent = path.parent().ok_or_else(|| {
            IpcError::Activation(format!("socket path has no parent: {}", path.display()))
        })?;
        secure_socket_dir(parent)?;
        safe_unlink(path)?;

        let std_listener = bind_with_umask(path, &limits)?;
        std_listener.set_nonblocking(true).map_err(IpcError::Io)?;
        let listener = UnixListener::from_std(std_listener).map_err(IpcError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(IpcError::Io)?;
        }

        info!(path = %path.display(), "listening on socket path");
        Ok(Self {
            listener,
            limits,
            bound_path: Some(path.to_path_buf()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the accept loop when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The path this server bound, when constructed via [`IpcServer::bind`].
    #[must_use]
    pub fn bound_path(&self) -> Option<&Path> {
        self.bound_path.as_deref()
    }

    /// Run the accept loop until the shutdown token fires, then drain.
    ///
    /// Shutdown order: stop accepting, let in-flight handlers finish within
    /// a bounded grace period, then return (remaining tasks are abandoned
    /// to process exit).
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself fails irrecoverably.
    pub async fn serve(self, handler: Arc<dyn RequestHandler>) -> IpcResult<()> {
        let permits = Arc::new(Semaphore::new(self.limits.max_connections));
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            // Accept-then-refuse: excess connections are
                            // closed immediately without doing any work.
                            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                                debug!("connection refused: at capacity");
                                drop(stream);
                                continue;
                            };

                            let handler = Arc::clone(&handler);
                            let limits = self.limits;
                            let shutdown = self.shutdown.clone();
                            tracker.spawn(async move {
                                handle_connection(stream, handler, limits, shutdown).await;
                                drop(permit);
                            });
                        },
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        },
                    }
                },
            }
        }

        // Stop accepting before draining: the listener closes with self at
        // the end of this function, but in-flight handlers get a bounded
        // window to finish their single request.
        tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "handlers still in flight at shutdown deadline"
            );
        }

        if let Some(path) = &self.bound_path {
            let _ = safe_unlink(path);
        }

        Ok(())
    }
}

impl std::fmt::Debug for IpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcServer")
            .field("bound_path", &self.bound_path)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Service one connection: read one frame, dispatch, write one response.
async fn handle_connection(
    mut stream: UnixStream,
    handler: Arc<dyn RequestHandler>,
    limits: ServerLimits,
    shutdown: CancellationToken,
) {
    let mut decoder = FrameDecoder::new(limits.max_frame_bytes, limits.kill_threshold_bytes);
    let mut chunk = vec![0u8; READ_CHUNK];

    let frame = loop {
        let read = tokio::select! {
            () = shutdown.cancelled() => return,
            read = tokio::time::timeout(limits.idle_timeout, stream.read(&mut chunk)) => read,
        };

        let n = match read {
            // Idle: no complete frame within the window (slowloris defense).
            Err(_elapsed) => {
                debug!("closing idle connection");
                return;
            },
            Ok(Err(e)) => {
                debug!(error = %e, "connection read failed");
                return;
            },
            Ok(Ok(0)) => {
                // EOF before a complete frame.
                return;
            },
            Ok(Ok(n)) => n,
        };

        match decoder.push(&chunk[..n]) {
            // Hard limit: close immediately, write nothing.
            Err(e) => {
                warn!(error = %e, "connection killed at hard frame limit");
                return;
            },
            Ok(events) => match events.into_iter().next() {
                Some(FrameEvent::Frame(frame)) => break frame,
                Some(FrameEvent::Oversize { buffered }) => {
                    let response = IpcResponse::err(
                        "",
                        format!(
                            "frame of {buffered} bytes exceeds limit of {} bytes",
                            limits.max_frame_bytes
                        ),
                    );
                    write_response(&mut stream, &response).await;
                    return;
                },
                None => {},
            },
        }
    };

    let request: IpcRequest = match serde_json::from_slice(&frame) {
        Ok(request) => request,
        Err(e) => {
            let response = IpcResponse::err("", format!("invalid request: {e}"));
            write_response(&mut stream, &response).await;
            return;
        },
    };

    let response = handler.handle(request).await;
    write_response(&mut stream, &response).await;
}

async fn write_response(stream: &mut UnixStream, response: &IpcResponse) {
    let Ok(bytes) = encode_frame(response) else {
        warn!("failed to encode response frame");
        return;
    };
    if let Err(e) = stream.write_all(&bytes).await {
        debug!(error = %e, "failed to write response");
        return;
    }
    let _ = stream.shutdown().await;
}

/// Bind a std listener at `path` under a temporarily tightened umask.
fn bind_with_umask(
    path: &Path,
    limits: &ServerLimits,
) -> IpcResult<std::os::unix::net::UnixListener> {
    use std::os::fd::AsRawFd;

    use nix::sys::socket::{
        AddressFamily, Backlog, SockFlag, SockType, UnixAddr, bind, listen, socket,
    };
    use nix::sys::stat::{Mode, umask};

    let prior = umask(Mode::from_bits_truncate(0o177));
    let result = (|| -> IpcResult<std::os::unix::net::UnixListener> {
        let fd = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| IpcError::Io(e.into()))?;

        let addr = UnixAddr::new(path).map_err(|e| IpcError::Io(e.into()))?;
        bind(fd.as_raw_fd(), &addr).map_err(|e| IpcError::Io(e.into()))?;

        let backlog = i32::try_from(limits.listen_backlog)
            .ok()
            .and_then(|b| Backlog::new(b).ok())
            .unwrap_or(Backlog::MAXCONN);
        listen(&fd, backlog).map_err(|e| IpcError::Io(e.into()))?;

        Ok(std::os::unix::net::UnixListener::from(fd))
    })();
    umask(prior);
    result
}
