pub mod http;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::error::{HubError, HubResult};
use crate::core::rpc::{RpcRequest, RpcResponse};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Multiplexes concurrent callers onto one framed line channel.
///
/// Correlation ids are always allocated here, never taken from the
/// caller, so two HTTP clients can never collide. A single writer task
/// serializes outgoing frames; a single reader loop resolves incoming
/// frames against the pending table. Responses may arrive in any
/// order; a frame whose id has no waiter (late arrival after a
/// timeout, or a server bug) is logged and dropped.
pub struct RpcChannel {
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>,
    tx_req: mpsc::Sender<String>,
    child: Mutex<Option<Child>>,
}

impl RpcChannel {
    /// Spawns the hub server as a child process and channels over its
    /// stdio. The child's stderr is drained into our logs.
    pub fn spawn(command: &str, args: &[&str]) -> HubResult<Arc<Self>> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HubError::Transport(format!("failed to spawn '{}': {}", command, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HubError::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HubError::Transport("child stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "hub_server", "{}", line);
                }
            });
        }

        let channel = Self::from_io(stdout, stdin);
        if let Ok(mut slot) = channel.child.try_lock() {
            *slot = Some(child);
        }
        Ok(channel)
    }

    /// Builds a channel over arbitrary reader/writer halves. Tests use
    /// in-memory pipes here; production uses a child's stdio.
    pub fn from_io<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx_req, mut rx_req) = mpsc::channel::<String>(64);
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            let mut writer = BufWriter::new(writer);
            while let Some(line) = rx_req.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let pending_reader = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: RpcResponse = match serde_json::from_str(&line) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("discarding unparseable frame: {}", e);
                        continue;
                    }
                };
                let Some(id) = frame.id.as_u64() else {
                    warn!(id = %frame.id, "discarding frame with non-numeric id");
                    continue;
                };
                match pending_reader.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => debug!(id, "discarding frame with no waiter"),
                }
            }
            // EOF. Dropping the senders fails every waiter with a
            // transport error.
            let mut pending = pending_reader.lock().await;
            if !pending.is_empty() {
                warn!(in_flight = pending.len(), "channel closed with requests in flight");
            }
            pending.clear();
        });

        Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            tx_req,
            child: Mutex::new(None),
        })
    }

    /// MCP handshake: initialize, then the initialized notification.
    pub async fn initialize(&self) -> HubResult<Value> {
        let result = self
            .request_with_timeout(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "agenthub-bridge", "version": env!("CARGO_PKG_VERSION")},
                })),
                INIT_TIMEOUT,
            )
            .await?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> HubResult<()> {
        let frame = RpcRequest::notification(method, params);
        let line =
            serde_json::to_string(&frame).map_err(|e| HubError::Transport(e.to_string()))?;
        self.tx_req
            .send(line)
            .await
            .map_err(|_| HubError::Transport("channel writer closed".into()))
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> HubResult<Value> {
        self.request_with_timeout(method, params, DEFAULT_TIMEOUT).await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> HubResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = RpcRequest::new(id, method, params);
        let line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(HubError::Transport(e.to_string()));
            }
        };
        if self.tx_req.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(HubError::Transport("channel writer closed".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => {
                if let Some(err) = resp.error {
                    return Err(HubError::Upstream(format!(
                        "{} failed with code {}: {}",
                        method, err.code, err.message
                    )));
                }
                Ok(resp.result.unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(HubError::Transport(format!(
                "channel closed while waiting for {}",
                method
            ))),
            Err(_) => {
                // Expired: drop the entry so a late frame is discarded
                // instead of resolving a finished call.
                self.pending.lock().await.remove(&id);
                Err(HubError::Transport(format!(
                    "{} timed out after {:?}",
                    method, timeout
                )))
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}
