//! Streamable HTTP transport: JSON-RPC envelopes POSTed to a single
//! endpoint, with optional SSE-framed responses and per-server auth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::McpError;
use crate::config::{McpAuthConfig, McpServerConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct HttpTransport {
    server_name: String,
    url: String,
    auth: Option<McpAuthConfig>,
    timeout: Duration,
    http: reqwest::Client,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(server: &McpServerConfig) -> Result<Self, McpError> {
        let url = server.url.clone().ok_or_else(|| McpError::Handshake {
            server: server.name.clone(),
            reason: "http server has no url configured".to_string(),
        })?;
        Ok(Self {
            server_name: server.name.clone(),
            url,
            auth: server.auth.clone(),
            timeout: server
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        })
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let body = self.post(&payload).await?;
        let message = decode_rpc_body(&self.server_name, &body)?;

        if let Some(error) = message.get("error") {
            return Err(McpError::Rpc {
                server: self.server_name.clone(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.post(&payload).await.map(|_| ())
    }

    async fn post(&self, payload: &Value) -> Result<String, McpError> {
        let mut builder = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .header("Accept", "application/json, text/event-stream")
            .json(payload);
        builder = match &self.auth {
            None => builder,
            Some(McpAuthConfig::Bearer { token }) => builder.bearer_auth(token),
            Some(McpAuthConfig::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(McpAuthConfig::ApiKey { header, key }) => builder.header(header.as_str(), key),
        };
        if let Some(session) = self.session_id.lock().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await.map_err(|source| McpError::Http {
            server: self.server_name.clone(),
            source,
        })?;
        let status = response.status();
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }
        let text = response.text().await.map_err(|source| McpError::Http {
            server: self.server_name.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(McpError::Transport {
                server: self.server_name.clone(),
                message: format!("HTTP {status}: {text}"),
            });
        }
        debug!(server = %self.server_name, status = %status, "MCP HTTP exchange complete");
        Ok(text)
    }
}

/// Accepts either a bare JSON-RPC message or one wrapped in SSE framing
/// (`data:` lines); the last data frame wins, matching streamable HTTP.
fn decode_rpc_body(server: &str, body: &str) -> Result<Value, McpError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let mut last_frame = None;
    for line in trimmed.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            if let Ok(value) = serde_json::from_str::<Value>(data.trim()) {
                last_frame = Some(value);
            }
        }
    }
    last_frame.ok_or_else(|| McpError::Transport {
        server: server.to_string(),
        message: format!("response is neither JSON nor SSE: {trimmed:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
        let message = decode_rpc_body("srv", body).expect("decodes");
        assert!(message.get("result").is_some());
    }

    #[test]
    fn decodes_sse_framed_body_taking_last_frame() {
        let body = "event: message\ndata: {\"id\":1,\"result\":{\"partial\":true}}\n\ndata: {\"id\":1,\"result\":{\"done\":true}}\n\n";
        let message = decode_rpc_body("srv", body).expect("decodes");
        assert_eq!(message["result"]["done"], true);
    }

    #[test]
    fn garbage_body_is_a_transport_error() {
        let err = decode_rpc_body("srv", "<html>oops</html>").unwrap_err();
        assert!(matches!(err, McpError::Transport { .. }));
    }
}
