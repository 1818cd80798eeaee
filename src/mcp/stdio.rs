//! Stdio transport: an MCP server as a child process speaking JSON-RPC
//! over stdin/stdout, one message per line.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

use super::error::McpError;
use crate::config::McpServerConfig;

#[derive(Clone)]
pub struct StdioTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    server: McpServerConfig,
    child: AsyncMutex<Option<Child>>,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub fn new(server: McpServerConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                server,
                child: AsyncMutex::new(None),
                writer: AsyncMutex::new(None),
                pending: AsyncMutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub async fn start(&self) -> Result<(), McpError> {
        {
            let child = self.inner.child.lock().await;
            if child.is_some() {
                return Ok(());
            }
        }

        let config = &self.inner.server;
        let command_path = config.command.clone().ok_or_else(|| McpError::Handshake {
            server: config.name.clone(),
            reason: "stdio server has no command configured".to_string(),
        })?;
        let mut command = Command::new(&command_path);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }
        if let Some(workdir) = &config.workdir {
            command.current_dir(workdir);
        }

        let mut child = command.spawn().map_err(|source| McpError::Spawn {
            server: config.name.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| self.transport_error("failed to capture server stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| self.transport_error("failed to capture server stdout"))?;

        *self.inner.writer.lock().await = Some(BufWriter::new(stdin));
        *self.inner.child.lock().await = Some(child);

        let reader = Arc::clone(&self.inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });
        Ok(())
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.write_line(&payload).await?;

        match rx.await {
            Ok(Ok(value)) => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(McpError::Cancelled {
                server: self.inner.server.name.clone(),
            }),
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.write_line(&payload).await
    }

    pub async fn close(&self) {
        self.inner.shutdown().await;
    }

    async fn write_line(&self, payload: &Value) -> Result<(), McpError> {
        let encoded = serde_json::to_string(payload).map_err(|source| McpError::InvalidJson {
            server: self.inner.server.name.clone(),
            source,
        })?;
        let mut writer = self.inner.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| self.transport_error("writer not initialised"))?;
        stream
            .write_all(encoded.as_bytes())
            .await
            .map_err(|err| self.transport_error(err.to_string()))?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|err| self.transport_error(err.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|err| self.transport_error(err.to_string()))
    }

    fn transport_error(&self, message: impl Into<String>) -> McpError {
        McpError::Transport {
            server: self.inner.server.name.clone(),
            message: message.into(),
        }
    }
}

impl TransportInner {
    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(item) = lines.next_line().await {
            let Some(raw) = item else { break };
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(message) => self.dispatch(message).await,
                Err(err) => {
                    // A corrupt frame is dropped; the stream continues.
                    warn!(
                        server = %self.server.name,
                        line = trimmed,
                        %err,
                        "dropping invalid JSON from MCP server"
                    );
                }
            }
        }
        self.shutdown().await;
    }

    async fn dispatch(self: &Arc<Self>, message: Value) {
        let has_method = message.get("method").is_some();
        let has_id = message.get("id").is_some();
        if has_id && has_method {
            self.answer_server_request(message).await;
        } else if has_id {
            match message.get("id").and_then(Value::as_u64) {
                Some(id) => self.complete_request(id, message).await,
                None => {
                    debug!(server = %self.server.name, "response with non-numeric id ignored");
                }
            }
        } else if let Some(method) = message.get("method").and_then(Value::as_str) {
            debug!(server = %self.server.name, method, "notification from MCP server");
        }
    }

    async fn complete_request(&self, id: u64, message: Value) {
        let sender = self.pending.lock().await.remove(&id);
        let Some(sender) = sender else {
            debug!(server = %self.server.name, id, "response for unknown request");
            return;
        };
        if let Some(error) = message.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
            let text = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            let _ = sender.send(Err(McpError::Rpc {
                server: self.server.name.clone(),
                code,
                message: text,
            }));
        } else {
            let _ = sender.send(Ok(message));
        }
    }

    async fn answer_server_request(self: &Arc<Self>, message: Value) {
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let reply = match method {
            "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            other => {
                warn!(server = %self.server.name, method = other, "unsupported server request");
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("client does not implement method '{other}'"),
                    },
                })
            }
        };
        let encoded = match serde_json::to_string(&reply) {
            Ok(encoded) => encoded,
            Err(_) => return,
        };
        let mut writer = self.writer.lock().await;
        if let Some(stream) = writer.as_mut() {
            let _ = stream.write_all(encoded.as_bytes()).await;
            let _ = stream.write_all(b"\n").await;
            let _ = stream.flush().await;
        }
    }

    async fn shutdown(&self) {
        *self.writer.lock().await = None;
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                debug!(server = %self.server.name, %err, "MCP server already exited");
            }
            let _ = child.wait().await;
        }
        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(McpError::Terminated {
                server: self.server.name.clone(),
            }));
        }
    }
}
