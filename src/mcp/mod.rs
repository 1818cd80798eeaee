//! # MCP client
//!
//! Federates external tool servers into the local tool registry. Each
//! configured server gets a transport (stdio subprocess or streamable
//! HTTP), a handshake, and a wrapper per advertised tool; calls dispatch
//! back to the owning server.

pub mod error;
pub mod http;
pub mod stdio;

pub use error::McpError;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::config::McpServerConfig;
use crate::llm::{FunctionDefinition, Schema, SchemaType};
use crate::tools::{ExecutionContext, Tool, ToolError, ToolRegistry};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// A tool advertised by a connected server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

enum Transport {
    Stdio(stdio::StdioTransport),
    Http(http::HttpTransport),
}

impl Transport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        match self {
            Transport::Stdio(t) => t.request(method, params).await,
            Transport::Http(t) => t.request(method, params).await,
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.notify(method, params).await,
            Transport::Http(t) => t.notify(method, params).await,
        }
    }

    async fn close(&self) {
        if let Transport::Stdio(t) = self {
            t.close().await;
        }
    }
}

/// Connection to a single MCP server.
pub struct McpClient {
    name: String,
    transport: Transport,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Result<Self, McpError> {
        let name = config.name.clone();
        let transport = if config.url.is_some() {
            Transport::Http(http::HttpTransport::new(&config)?)
        } else {
            Transport::Stdio(stdio::StdioTransport::new(config))
        };
        Ok(Self { name, transport })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Perform the protocol handshake and verify the connection by
    /// listing tools. A failure here is fatal for this server.
    pub async fn connect(&self) -> Result<Vec<McpToolInfo>, McpError> {
        if let Transport::Stdio(t) = &self.transport {
            t.start().await?;
        }
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        });
        self.transport
            .request("initialize", params)
            .await
            .map_err(|err| McpError::Handshake {
                server: self.name.clone(),
                reason: err.to_string(),
            })?;
        self.transport
            .notify("notifications/initialized", json!({}))
            .await?;

        let tools = self.list_tools().await?;
        info!(server = self.name.as_str(), tools = tools.len(), "MCP server connected");
        Ok(tools)
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let result = self.transport.request("tools/list", json!({})).await?;
        let mut tools = Vec::new();
        if let Some(entries) = result.get("tools").and_then(Value::as_array) {
            for entry in entries {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                tools.push(McpToolInfo {
                    name: name.to_string(),
                    description: entry
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: entry.get("inputSchema").cloned(),
                });
            }
        }
        Ok(tools)
    }

    /// Invoke a tool and return its raw result payload.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = json!({
            "name": name,
            "arguments": match arguments {
                Value::Null => Value::Object(Map::new()),
                other => other,
            },
        });
        self.transport.request("tools/call", params).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

/// Text of the first content block, when that block is text.
fn extract_text_content(result: &Value) -> Option<String> {
    let block = result.get("content")?.as_array()?.first()?;
    let is_text = block
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t.eq_ignore_ascii_case("text"))
        .unwrap_or(false);
    if !is_text {
        return None;
    }
    block
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map a `tools/call` result into the text handed back to the model, or
/// the failure to surface when the server flags `isError`.
fn decode_tool_result(result: &Value) -> Result<String, String> {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    if is_error {
        return Err(match extract_text_content(result) {
            Some(text) => format!("tool error: {text}"),
            None => "tool returned an error".to_string(),
        });
    }
    Ok(extract_text_content(result).unwrap_or_else(|| {
        "Tool executed successfully, but no text content was returned".to_string()
    }))
}

/// Best-effort conversion from a server's JSON Schema into the uniform
/// form. Unknown or missing pieces degrade to a bare object schema.
pub fn schema_from_json(value: &Value) -> Schema {
    let schema_type = match value.get("type").and_then(Value::as_str) {
        Some("string") => SchemaType::String,
        Some("number") => SchemaType::Number,
        Some("integer") => SchemaType::Integer,
        Some("boolean") => SchemaType::Boolean,
        Some("array") => SchemaType::Array,
        _ => SchemaType::Object,
    };
    let mut schema = Schema::of(schema_type);
    schema.description = value
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(properties) = value.get("properties").and_then(Value::as_object) {
        for (name, prop) in properties {
            schema.properties.insert(name.clone(), schema_from_json(prop));
        }
    }
    if let Some(required) = value.get("required").and_then(Value::as_array) {
        schema.required = required
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    if let Some(items) = value.get("items") {
        if items.is_object() {
            schema.items = Some(Box::new(schema_from_json(items)));
        }
    }
    schema
}

/// Normalise a server tool name into the registry's identifier grammar.
fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            'a'..='z' | '0'..='9' | '_' | '-' => out.push(c),
            'A'..='Z' => out.push(c.to_ascii_lowercase()),
            _ => out.push('_'),
        }
    }
    while out.starts_with(|c: char| !c.is_ascii_lowercase()) && !out.is_empty() {
        out.remove(0);
    }
    if out.is_empty() {
        out.push_str("tool");
    }
    out.truncate(64);
    out
}

/// A federated tool: registry entries dispatch to the owning server.
pub struct McpTool {
    catalog_name: String,
    remote_name: String,
    description: String,
    parameters: Schema,
    client: Arc<McpClient>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.catalog_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn function_definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.catalog_name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    async fn run(
        &self,
        _ctx: &ExecutionContext,
        args: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let result = self
            .client
            .call_tool(&self.remote_name, Value::Object(args))
            .await
            .map_err(|err| ToolError::Execution {
                tool: self.catalog_name.clone(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            })?;

        match decode_tool_result(&result) {
            Ok(text) => Ok(Value::String(text)),
            Err(message) => Err(ToolError::Execution {
                tool: self.catalog_name.clone(),
                message,
                retryable: false,
            }),
        }
    }
}

/// Holds connected server clients and their registry entries.
pub struct McpManager {
    clients: Vec<Arc<McpClient>>,
}

impl McpManager {
    /// Connect every configured server and merge its catalog into the
    /// registry. A server that fails its handshake or first `tools/list`
    /// is skipped; the rest keep working.
    pub async fn connect_all(
        configs: Vec<McpServerConfig>,
        registry: &ToolRegistry,
    ) -> Self {
        let mut clients = Vec::new();
        let mut seen: HashSet<String> = registry.names().into_iter().collect();

        for config in configs {
            let server_name = config.name.clone();
            let client = match McpClient::new(config) {
                Ok(client) => Arc::new(client),
                Err(err) => {
                    warn!(server = server_name.as_str(), %err, "skipping MCP server");
                    continue;
                }
            };
            let tools = match client.connect().await {
                Ok(tools) => tools,
                Err(err) => {
                    warn!(server = server_name.as_str(), %err, "skipping MCP server");
                    client.close().await;
                    continue;
                }
            };

            for tool in tools {
                let base = sanitize_name(&tool.name);
                // Duplicate bare names get the server suffix.
                let catalog_name = if seen.contains(&base) {
                    sanitize_name(&format!("{base}__{server_name}"))
                } else {
                    base
                };
                if seen.contains(&catalog_name) {
                    warn!(
                        server = server_name.as_str(),
                        tool = tool.name.as_str(),
                        "tool id collides even with server suffix; skipping"
                    );
                    continue;
                }

                let description = match &tool.description {
                    Some(desc) if !desc.trim().is_empty() => {
                        format!("{} (from {})", desc.trim(), server_name)
                    }
                    _ => format!("Tool provided by MCP server {server_name}"),
                };
                let parameters = tool
                    .input_schema
                    .as_ref()
                    .map(schema_from_json)
                    .unwrap_or_else(Schema::object);

                let wrapped = McpTool {
                    catalog_name: catalog_name.clone(),
                    remote_name: tool.name.clone(),
                    description,
                    parameters,
                    client: Arc::clone(&client),
                };
                match registry.register(Arc::new(wrapped)) {
                    Ok(()) => {
                        seen.insert(catalog_name);
                    }
                    Err(err) => {
                        warn!(
                            server = server_name.as_str(),
                            tool = tool.name.as_str(),
                            %err,
                            "failed to register MCP tool"
                        );
                    }
                }
            }
            clients.push(client);
        }
        Self { clients }
    }

    pub async fn close_all(&self) {
        for client in &self.clients {
            client.close().await;
        }
    }

    pub fn server_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_conversion_keeps_structure() {
        let json_schema = json!({
            "type": "object",
            "description": "params",
            "properties": {
                "city": {"type": "string", "description": "city name"},
                "days": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["city"],
        });
        let schema = schema_from_json(&json_schema);
        assert_eq!(schema.schema_type, SchemaType::Object);
        assert_eq!(schema.properties.len(), 3);
        assert_eq!(schema.properties["city"].schema_type, SchemaType::String);
        assert_eq!(schema.properties["days"].schema_type, SchemaType::Integer);
        assert_eq!(
            schema.properties["tags"].items.as_ref().unwrap().schema_type,
            SchemaType::String
        );
        assert_eq!(schema.required, vec!["city".to_string()]);
    }

    #[test]
    fn successful_result_yields_first_text_block() {
        let result = json!({
            "content": [{"type": "text", "text": "two pods running"}],
            "isError": false,
        });
        assert_eq!(decode_tool_result(&result).as_deref(), Ok("two pods running"));
    }

    #[test]
    fn success_without_text_content_gets_the_fallback_message() {
        let no_content = json!({"content": []});
        assert_eq!(
            decode_tool_result(&no_content).as_deref(),
            Ok("Tool executed successfully, but no text content was returned")
        );
        // A non-text first block reads the same as no content at all.
        let image_first = json!({"content": [{"type": "image", "data": "…"}]});
        assert_eq!(
            decode_tool_result(&image_first).as_deref(),
            Ok("Tool executed successfully, but no text content was returned")
        );
    }

    #[test]
    fn is_error_result_surfaces_as_tool_error() {
        let result = json!({
            "content": [{"type": "text", "text": "namespace not found"}],
            "isError": true,
        });
        assert_eq!(
            decode_tool_result(&result),
            Err("tool error: namespace not found".to_string())
        );

        let bare = json!({"isError": true});
        assert_eq!(decode_tool_result(&bare), Err("tool returned an error".to_string()));
    }

    #[test]
    fn names_are_sanitized_into_the_grammar() {
        assert_eq!(sanitize_name("Get Current Time"), "get_current_time");
        assert_eq!(sanitize_name("search"), "search");
        assert_eq!(sanitize_name("9-lives"), "lives");
        assert!(crate::tools::is_valid_tool_name(&sanitize_name("Weather.Lookup")));
    }
}
