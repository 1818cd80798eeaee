use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport failure on MCP server '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("MCP server '{server}' returned error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("invalid JSON exchanged with MCP server '{server}': {source}")]
    InvalidJson {
        server: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handshake with MCP server '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("MCP server '{server}' terminated")]
    Terminated { server: String },

    #[error("request to MCP server '{server}' was cancelled")]
    Cancelled { server: String },

    #[error("HTTP error from MCP server '{server}': {source}")]
    Http {
        server: String,
        #[source]
        source: reqwest::Error,
    },
}

impl McpError {
    /// Whether the failure is worth surfacing to the LLM as retryable
    /// (the server may come back; the loop should continue).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McpError::Transport { .. }
                | McpError::Terminated { .. }
                | McpError::Http { .. }
                | McpError::Cancelled { .. }
        )
    }
}
