//! Transport Session: one JSON-RPC channel to one tool server.
//!
//! Frames are newline-delimited JSON. A reader task routes responses to their
//! waiters by id, so any number of requests may be in flight on one session
//! and complete in any order. A writer task owns the outbound half; callers
//! only enqueue whole lines, so dropping a request future never leaves a
//! half-written frame behind.

use crate::config::{ServerConfig, TransportConfig};
use crate::protocol::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use toolgate_core::{GatewayError, GatewayResult, ToolSchema};
use tracing::{debug, warn};

/// How long `close()` waits for a child process to exit before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_CATALOG_PAGES: usize = 64;

/// Failure of a single request on a session.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The session is closed; carries the reason it was closed.
    #[error("session closed: {0}")]
    Closed(String),
    /// The server answered with something we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No response arrived within the bound.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },
}

type Reply = Result<JsonRpcResponse, String>;
type Waiter = oneshot::Sender<Reply>;

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, Waiter>,
    closed: Option<String>,
}

struct Shared {
    server: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state: Mutex<PendingState>,
    next_id: AtomicU64,
}

impl Shared {
    fn register(&self, id: u64) -> Result<oneshot::Receiver<Reply>, TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(TransportError::Closed(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok(rx)
    }

    fn send_line(&self, line: String) -> Result<(), TransportError> {
        let outbound = self.outbound.lock();
        let tx = outbound
            .as_ref()
            .ok_or_else(|| TransportError::Closed(self.close_reason()))?;
        tx.send(line)
            .map_err(|_| TransportError::Closed("writer stopped".into()))
    }

    fn send_frame<T: serde::Serialize>(&self, frame: &T) -> Result<(), TransportError> {
        let line =
            serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.send_line(line)
    }

    fn complete(&self, response: JsonRpcResponse) {
        let waiter = self.state.lock().waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(response));
            }
            None => debug!(server = %self.server, id = response.id, "Dropping late or unknown response"),
        }
    }

    /// Mark the session closed and wake every waiter. Only the first reason sticks.
    fn fail(&self, reason: String) {
        let drained: Vec<Waiter> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason);
            }
            state.waiters.drain().map(|(_, tx)| tx).collect()
        };
        self.outbound.lock().take();
        let reason = self.close_reason();
        for tx in drained {
            let _ = tx.send(Err(reason.clone()));
        }
    }

    fn close_reason(&self) -> String {
        self.state
            .lock()
            .closed
            .clone()
            .unwrap_or_else(|| "session closed".into())
    }

    fn cancel(&self, id: u64, reason: &str) {
        let notice = JsonRpcNotification::new(
            "notifications/cancelled",
            Some(json!({"requestId": id, "reason": reason})),
        );
        if self.send_frame(&notice).is_ok() {
            debug!(server = %self.server, id, reason, "Sent cancellation");
        }
    }
}

/// Removes an unanswered request from the pending table when the caller stops
/// waiting, and tells the server if the request already went out.
struct PendingGuard {
    shared: Arc<Shared>,
    id: u64,
    sent: bool,
    answered: bool,
    reason: &'static str,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        let removed = self.shared.state.lock().waiters.remove(&self.id).is_some();
        if removed && self.sent {
            self.shared.cancel(self.id, self.reason);
        }
    }
}

/// A live channel to one tool server.
pub struct Session {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
}

impl Session {
    /// Open the channel described by `config`. Performs no handshake.
    pub async fn open(config: &ServerConfig) -> GatewayResult<Self> {
        let connection_error = |reason: String| GatewayError::Connection {
            server: config.name.clone(),
            reason,
        };

        match &config.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .envs(env)
                    .stdin(std::process::Stdio::piped())
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::null())
                    .kill_on_drop(true);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }

                let mut child = cmd
                    .spawn()
                    .map_err(|e| connection_error(format!("failed to spawn '{command}': {e}")))?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| connection_error("child stdin not available".into()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| connection_error("child stdout not available".into()))?;

                debug!(server = %config.name, command = %command, pid = ?child.id(), "Spawned tool server");
                let session = Self::from_io(config.name.clone(), stdout, stdin);
                *session.child.lock() = Some(child);
                Ok(session)
            }
            TransportConfig::Tcp { address } => {
                let stream = TcpStream::connect(address)
                    .await
                    .map_err(|e| connection_error(format!("failed to connect to {address}: {e}")))?;
                let _ = stream.set_nodelay(true);
                debug!(server = %config.name, address = %address, "Connected to tool server");
                let (read_half, write_half) = stream.into_split();
                Ok(Self::from_io(config.name.clone(), read_half, write_half))
            }
        }
    }

    /// Wrap an already-established byte stream pair.
    pub fn from_io<R, W>(server: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            server: server.into(),
            outbound: Mutex::new(Some(tx)),
            state: Mutex::new(PendingState::default()),
            next_id: AtomicU64::new(1),
        });

        let writer_task = tokio::spawn(write_loop(shared.clone(), writer, rx));
        let reader_task = tokio::spawn(read_loop(shared.clone(), reader));

        Self {
            shared,
            reader: Mutex::new(Some(reader_task)),
            writer: Mutex::new(Some(writer_task)),
            child: Mutex::new(None),
        }
    }

    /// Name of the server on the other end.
    pub fn server(&self) -> &str {
        &self.shared.server
    }

    /// True once the channel failed or was closed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// Returns the `result` member; a JSON-RPC error becomes [`TransportError::Rpc`].
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, TransportError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.shared.register(id)?;
        let mut guard = PendingGuard {
            shared: self.shared.clone(),
            id,
            sent: false,
            answered: false,
            reason: "request abandoned",
        };

        self.shared
            .send_frame(&JsonRpcRequest::new(id, method, params))?;
        guard.sent = true;

        let response = match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                guard.reason = "request timed out";
                return Err(TransportError::Timeout(timeout));
            }
            Ok(Err(_)) => {
                guard.answered = true;
                return Err(TransportError::Closed(self.shared.close_reason()));
            }
            Ok(Ok(outcome)) => {
                guard.answered = true;
                outcome.map_err(TransportError::Closed)?
            }
        };

        if let Some(err) = response.error {
            return Err(TransportError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Send a notification (no response expected).
    pub fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        self.shared
            .send_frame(&JsonRpcNotification::new(method, params))
    }

    /// Run the MCP handshake: `initialize`, `notifications/initialized`, then
    /// the full (paginated) `tools/list` catalog.
    pub async fn handshake(
        &self,
        timeout: Duration,
    ) -> Result<(InitializeResult, Vec<ToolSchema>), TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolgate",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.request("initialize", Some(params), timeout).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("invalid initialize result: {e}")))?;

        self.notify("notifications/initialized", None)?;

        let tools = self.list_tools(timeout).await?;
        Ok((init, tools))
    }

    /// Fetch the server's complete tool catalog, following `nextCursor`.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolSchema>, TransportError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CATALOG_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params, timeout).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| TransportError::Protocol(format!("invalid tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(TransportError::Protocol(format!(
            "tools/list did not finish within {MAX_CATALOG_PAGES} pages"
        )))
    }

    /// Invoke a tool. The `tools/call` result is returned unchanged.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, TransportError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.request("tools/call", Some(params), timeout).await
    }

    /// Liveness check.
    pub async fn ping(&self, timeout: Duration) -> Result<(), TransportError> {
        self.request("ping", None, timeout).await.map(|_| ())
    }

    /// Close the channel and reap any child process. Safe to call repeatedly.
    pub async fn close(&self) {
        self.shared.fail("session closed".into());

        // The writer drains what is queued, then shuts its half down.
        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.shared.server, status = %status, "Tool server exited");
                }
                Ok(Err(e)) => {
                    warn!(server = %self.shared.server, error = %e, "Failed to wait for tool server");
                }
                Err(_) => {
                    warn!(server = %self.shared.server, "Tool server did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(server = %self.shared.server, error = %e, "Failed to kill tool server");
                    }
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.fail("session dropped".into());
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.writer.get_mut().take() {
            task.abort();
        }
    }
}

async fn write_loop<W>(shared: Arc<Shared>, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(server = %shared.server, error = %e, "Write to tool server failed");
            shared.fail(format!("write failed: {e}"));
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(shared: Arc<Shared>, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_frame(trimmed) {
                    Ok(IncomingFrame::Response(response)) => shared.complete(response),
                    Ok(IncomingFrame::Request { id, method }) => {
                        debug!(server = %shared.server, method = %method, "Refusing server-initiated request");
                        let reply = json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {
                                "code": METHOD_NOT_FOUND,
                                "message": format!("method not supported by client: {method}"),
                            }
                        });
                        let _ = shared.send_frame(&reply);
                    }
                    Ok(IncomingFrame::Notification { method }) => {
                        debug!(server = %shared.server, method = %method, "Ignoring server notification");
                    }
                    Ok(IncomingFrame::Orphan(error)) => {
                        warn!(server = %shared.server, code = error.code, message = %error.message, "Server reported an error without a request id");
                    }
                    Err(e) => {
                        warn!(server = %shared.server, error = %e, "Malformed frame, closing session");
                        break format!("protocol error: {e}");
                    }
                }
            }
            Ok(None) => break "server closed the connection".to_string(),
            Err(e) => break format!("read failed: {e}"),
        }
    };
    debug!(server = %shared.server, reason = %reason, "Session reader stopped");
    shared.fail(reason);
}
