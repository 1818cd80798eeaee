//! OpenAI-compatible adapter.
//!
//! Covers the OpenAI API itself plus the compatible surfaces this tool
//! supports: Azure OpenAI deployments, Grok, and a local llama.cpp server.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::base::{AuthMode, HttpBase, require_env};
use crate::llm::error::LlmError;
use crate::llm::registry::ProviderUri;
use crate::llm::traits::{Chat, Client};
use crate::llm::types::{
    Candidate, ChatResponse, ChatStream, CompletionRequest, CompletionResponse, Content,
    FunctionCall, FunctionDefinition, Part, Schema, SchemaType, Usage,
};

const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com";
const GROK_ENDPOINT: &str = "https://api.x.ai";
const LLAMACPP_DEFAULT_ENDPOINT: &str = "http://localhost:8080";
const AZURE_API_VERSION: &str = "2024-10-21";

const OPENAI_DEFAULT_MODEL: &str = "gpt-4.1";
const GROK_DEFAULT_MODEL: &str = "grok-3-beta";

/// Which OpenAI-compatible backend this client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    OpenAi,
    Azure,
    Grok,
    LlamaCpp,
}

#[derive(Debug)]
pub struct OpenAiClient {
    base: HttpBase,
    flavor: Flavor,
    default_model: String,
    /// Azure deployment name; doubles as the model id on that flavor.
    deployment: Option<String>,
}

impl OpenAiClient {
    pub fn from_uri(uri: &ProviderUri, flavor: Flavor) -> Result<Self, LlmError> {
        let host_endpoint = uri.host.as_deref().map(|h| format!("https://{h}"));
        let (endpoint, auth, default_model, deployment) = match flavor {
            Flavor::OpenAi => (
                std::env::var("OPENAI_ENDPOINT")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .or(host_endpoint)
                    .unwrap_or_else(|| OPENAI_DEFAULT_ENDPOINT.to_string()),
                AuthMode::Bearer(require_env("OPENAI_API_KEY")?),
                OPENAI_DEFAULT_MODEL.to_string(),
                None,
            ),
            Flavor::Azure => {
                let endpoint = std::env::var("AZURE_OPENAI_ENDPOINT")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .or(host_endpoint)
                    .ok_or_else(|| {
                        LlmError::configuration(
                            "azopenai requires AZURE_OPENAI_ENDPOINT or a host in the provider URI",
                        )
                    })?;
                let deployment = uri
                    .query_param("deployment")
                    .map(str::to_string)
                    .ok_or_else(|| {
                        LlmError::configuration(
                            "azopenai requires a deployment, e.g. azopenai://host?deployment=name",
                        )
                    })?;
                (
                    endpoint,
                    AuthMode::Header("api-key", require_env("AZURE_OPENAI_API_KEY")?),
                    deployment.clone(),
                    Some(deployment),
                )
            }
            Flavor::Grok => (
                host_endpoint.unwrap_or_else(|| GROK_ENDPOINT.to_string()),
                AuthMode::Bearer(require_env("GROK_API_KEY")?),
                GROK_DEFAULT_MODEL.to_string(),
                None,
            ),
            Flavor::LlamaCpp => (
                uri.host
                    .as_deref()
                    .map(|h| format!("http://{h}"))
                    .unwrap_or_else(|| LLAMACPP_DEFAULT_ENDPOINT.to_string()),
                AuthMode::None,
                "default".to_string(),
                None,
            ),
        };
        let provider = match flavor {
            Flavor::OpenAi => "openai",
            Flavor::Azure => "azopenai",
            Flavor::Grok => "grok",
            Flavor::LlamaCpp => "llamacpp",
        };
        Ok(Self {
            base: HttpBase::new(provider, endpoint, auth),
            flavor,
            default_model,
            deployment,
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn chat_url(&self) -> String {
        match (self.flavor, self.deployment.as_deref()) {
            (Flavor::Azure, Some(deployment)) => self.base.build_url(&format!(
                "openai/deployments/{deployment}/chat/completions?api-version={AZURE_API_VERSION}"
            )),
            _ => self.base.build_url("v1/chat/completions"),
        }
    }
}

#[async_trait]
impl Client for OpenAiClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        if let Some(deployment) = &self.deployment {
            return Ok(vec![deployment.clone()]);
        }
        let url = self.base.build_url("v1/models");
        let listing: ModelListing = self.base.get_json(&url).await?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let payload = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        let response: WireResponse = self.base.post_json(&self.chat_url(), &payload).await?;
        let message = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or_else(|| LlmError::invalid_response(&self.base.provider, "missing choices"))?;
        Ok(CompletionResponse {
            text: message.content.unwrap_or_default(),
            usage: response
                .usage
                .map(|u| u.into_usage(&self.base.provider, &model)),
        })
    }

    fn start_chat(&self, system_prompt: &str, model: &str) -> Result<Box<dyn Chat>, LlmError> {
        let model = if model.is_empty() {
            self.default_model.clone()
        } else {
            model.to_string()
        };
        if model.trim().is_empty() {
            return Err(LlmError::configuration("model not supported: empty model id"));
        }
        Ok(Box::new(OpenAiChat {
            base: self.base.clone(),
            chat_url: self.chat_url(),
            model,
            system_prompt: system_prompt.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
            tools: None,
        }))
    }

    fn supports_tools(&self, _model: &str) -> bool {
        true
    }

    fn supports_streaming(&self, _model: &str) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct OpenAiChat {
    base: HttpBase,
    chat_url: String,
    model: String,
    system_prompt: String,
    // Wire-format history; shared with in-flight streams so the assembled
    // assistant message lands in order once the stream is drained.
    history: Arc<Mutex<Vec<Value>>>,
    tools: Option<Vec<Value>>,
}

impl OpenAiChat {
    fn push_contents(&self, contents: &[Content]) {
        let mut history = self.history.lock().expect("chat history poisoned");
        for content in contents {
            history.push(wire_message(content));
        }
    }

    fn build_payload(&self, stream: bool) -> Value {
        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": self.system_prompt}));
        }
        messages.extend(self.history.lock().expect("chat history poisoned").iter().cloned());

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(tools) = &self.tools {
            payload["tools"] = Value::Array(tools.clone());
        }
        if stream {
            payload["stream"] = Value::Bool(true);
            payload["stream_options"] = json!({"include_usage": true});
        }
        payload
    }

    fn record_assistant(&self, text: &str, calls: &[FunctionCall]) {
        let mut message = json!({"role": "assistant"});
        message["content"] = if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };
        if !calls.is_empty() {
            let wire_calls: Vec<Value> = calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id.clone().unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": Value::Object(call.arguments.clone()).to_string(),
                        },
                    })
                })
                .collect();
            message["tool_calls"] = Value::Array(wire_calls);
        }
        self.history
            .lock()
            .expect("chat history poisoned")
            .push(message);
    }
}

#[async_trait]
impl Chat for OpenAiChat {
    async fn send(&mut self, contents: &[Content]) -> Result<ChatResponse, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload(false);
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending chat request"
        );
        let response: WireResponse = self.base.post_json(&self.chat_url, &payload).await?;
        debug!("chat response received");

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::invalid_response(&self.base.provider, "missing choices"))?;
        let message = choice
            .message
            .ok_or_else(|| LlmError::invalid_response(&self.base.provider, "missing message"))?;

        let text = message.content.clone().unwrap_or_default();
        let mut calls = Vec::new();
        for wire_call in message.tool_calls.unwrap_or_default() {
            calls.push(decode_tool_call(&self.base.provider, &wire_call)?);
        }
        self.record_assistant(&text, &calls);

        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        if !calls.is_empty() {
            parts.push(Part::FunctionCalls(calls));
        }
        Ok(ChatResponse {
            candidates: vec![Candidate { parts }],
            usage: response
                .usage
                .map(|u| u.into_usage(&self.base.provider, &self.model)),
        })
    }

    async fn send_streaming(&mut self, contents: &[Content]) -> Result<ChatStream, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload(true);
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending streaming chat request"
        );
        let response = self.base.post_stream(&self.chat_url, &payload).await?;

        let provider = self.base.provider.clone();
        let model = self.model.clone();
        let history = Arc::clone(&self.history);
        let stream = async_stream(response, provider, model, history);
        Ok(stream)
    }

    fn set_function_definitions(&mut self, defs: &[FunctionDefinition]) -> Result<(), LlmError> {
        self.tools = Some(defs.iter().map(tool_definition).collect());
        Ok(())
    }
}

/// Translate one content element into the wire message format.
fn wire_message(content: &Content) -> Value {
    match content {
        Content::UserText(text) => json!({"role": "user", "content": text}),
        Content::SystemText(text) => json!({"role": "system", "content": text}),
        Content::ToolResult(result) => {
            let body = match &result.error {
                Some(error) => json!({"error": error, "result": result.result}),
                None => result.result.clone(),
            };
            json!({
                "role": "tool",
                "tool_call_id": result.id.clone().unwrap_or_default(),
                "content": body.to_string(),
            })
        }
    }
}

fn decode_tool_call(provider: &str, wire_call: &WireToolCall) -> Result<FunctionCall, LlmError> {
    if wire_call.function.name.trim().is_empty() {
        return Err(LlmError::invalid_response(provider, "tool call with empty function name"));
    }
    let arguments = parse_arguments(&wire_call.function.arguments).ok_or_else(|| {
        LlmError::invalid_response(
            provider,
            format!("unparseable tool arguments: {:?}", wire_call.function.arguments),
        )
    })?;
    Ok(FunctionCall {
        id: wire_call.id.clone(),
        name: wire_call.function.name.clone(),
        arguments,
    })
}

fn parse_arguments(raw: &str) -> Option<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Translate the uniform schema into OpenAI's dialect.
///
/// Integer downgrades to number, object nodes always carry a `properties`
/// map (even when empty), and arrays without an item schema default to
/// string items.
pub fn to_openai_schema(schema: &Schema) -> Value {
    let type_name = match schema.schema_type {
        SchemaType::Object => "object",
        SchemaType::String => "string",
        SchemaType::Number | SchemaType::Integer => "number",
        SchemaType::Boolean => "boolean",
        SchemaType::Array => "array",
    };
    let mut out = Map::new();
    out.insert("type".to_string(), Value::String(type_name.to_string()));
    if let Some(description) = &schema.description {
        out.insert("description".to_string(), Value::String(description.clone()));
    }
    match schema.schema_type {
        SchemaType::Object => {
            let mut properties = Map::new();
            for (name, prop) in &schema.properties {
                properties.insert(name.clone(), to_openai_schema(prop));
            }
            out.insert("properties".to_string(), Value::Object(properties));
            if !schema.required.is_empty() {
                out.insert(
                    "required".to_string(),
                    Value::Array(schema.required.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        SchemaType::Array => {
            let items = schema
                .items
                .as_deref()
                .map(to_openai_schema)
                .unwrap_or_else(|| json!({"type": "string"}));
            out.insert("items".to_string(), items);
        }
        _ => {}
    }
    Value::Object(out)
}

fn tool_definition(def: &FunctionDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": to_openai_schema(&def.parameters),
        },
    })
}

/// Reassembles function calls and text from streaming deltas.
///
/// Tool-call fragments accumulate by index. If the accumulator saw nothing
/// but the terminal delta carried a complete tool call with parseable
/// arguments, that call is accepted as a fallback. Deltas with empty
/// function names or unparseable argument JSON are dropped with a warning;
/// the stream continues.
#[derive(Default)]
pub struct StreamAccumulator {
    content: String,
    partials: BTreeMap<usize, PartialToolCall>,
    last_tool_delta: Option<Value>,
    usage: Option<WireUsage>,
}

#[derive(Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one streaming payload; returns the text delta to forward.
    pub fn process(&mut self, payload: &Value) -> Option<String> {
        if let Some(usage) = payload.get("usage") {
            if !usage.is_null() {
                if let Ok(parsed) = serde_json::from_value::<WireUsage>(usage.clone()) {
                    self.usage = Some(parsed);
                }
            }
        }

        let delta = payload.get("choices")?.get(0)?.get("delta")?;
        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            self.last_tool_delta = Some(delta.clone());
            for tool_call in tool_calls {
                let index = tool_call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let partial = self.partials.entry(index).or_default();
                if let Some(id) = tool_call.get("id").and_then(Value::as_str) {
                    partial.id = Some(id.to_string());
                }
                if let Some(function) = tool_call.get("function") {
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        partial.name = Some(name.to_string());
                    }
                    if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                        partial.arguments.push_str(args);
                    }
                }
            }
        }

        let text = delta.get("content").and_then(Value::as_str)?;
        if text.is_empty() {
            return None;
        }
        self.content.push_str(text);
        Some(text.to_string())
    }

    /// Final text, assembled function calls, and usage.
    pub fn finish(self, provider: &str, model: &str) -> (String, Vec<FunctionCall>, Option<Usage>) {
        let mut calls = Vec::new();
        for (_, partial) in &self.partials {
            let Some(name) = partial.name.as_deref().filter(|n| !n.trim().is_empty()) else {
                warn!(provider, "dropping streamed tool call with empty name");
                continue;
            };
            let Some(arguments) = parse_arguments(&partial.arguments) else {
                warn!(
                    provider,
                    name, "dropping streamed tool call with unparseable arguments"
                );
                continue;
            };
            calls.push(FunctionCall {
                id: partial.id.clone(),
                name: name.to_string(),
                arguments,
            });
        }

        // Accumulator-miss fallback: a complete call in the terminal delta.
        if calls.is_empty() {
            if let Some(delta) = &self.last_tool_delta {
                calls = complete_calls_from_delta(delta);
            }
        }

        let usage = self.usage.map(|u| u.into_usage(provider, model));
        (self.content, calls, usage)
    }
}

fn complete_calls_from_delta(delta: &Value) -> Vec<FunctionCall> {
    let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut calls = Vec::new();
    for tool_call in tool_calls {
        let name = tool_call
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if name.trim().is_empty() {
            continue;
        }
        let raw_args = tool_call
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(arguments) = parse_arguments(raw_args) else {
            continue;
        };
        calls.push(FunctionCall {
            id: tool_call.get("id").and_then(Value::as_str).map(str::to_string),
            name: name.to_string(),
            arguments,
        });
    }
    calls
}

fn async_stream(
    response: reqwest::Response,
    provider: String,
    model: String,
    history: Arc<Mutex<Vec<Value>>>,
) -> ChatStream {
    let stream = futures::stream::unfold(
        StreamState {
            events: Box::pin(response.bytes_stream().eventsource()),
            accumulator: Some(StreamAccumulator::new()),
            provider,
            model,
            history,
        },
        |mut state| async move {
            loop {
                if state.accumulator.is_none() {
                    return None;
                }
                match state.events.next().await {
                    Some(Ok(event)) => {
                        if event.data.trim() == "[DONE]" {
                            return Some((Ok(state.finish()), state));
                        }
                        match serde_json::from_str::<Value>(&event.data) {
                            Ok(payload) => {
                                let delta = state
                                    .accumulator
                                    .as_mut()
                                    .and_then(|acc| acc.process(&payload));
                                if let Some(text) = delta {
                                    return Some((Ok(ChatResponse::from_text(text)), state));
                                }
                                // No forwardable delta; keep reading.
                            }
                            Err(err) => {
                                warn!(%err, "dropping unparseable streaming delta");
                            }
                        }
                    }
                    Some(Err(err)) => {
                        state.accumulator = None;
                        return Some((
                            Err(LlmError::invalid_response(
                                "openai",
                                format!("stream transport error: {err}"),
                            )),
                            state,
                        ));
                    }
                    // Stream ended without [DONE]; finish with what we have.
                    None => return Some((Ok(state.finish()), state)),
                }
            }
        },
    );
    Box::pin(stream)
}

struct StreamState {
    events: futures::stream::BoxStream<
        'static,
        Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>,
    >,
    accumulator: Option<StreamAccumulator>,
    provider: String,
    model: String,
    history: Arc<Mutex<Vec<Value>>>,
}

impl StreamState {
    fn finish(&mut self) -> ChatResponse {
        let accumulator = self.accumulator.take().unwrap_or_default();
        let (text, calls, usage) = accumulator.finish(&self.provider, &self.model);

        // Mirror the assembled assistant turn into the chat history.
        let mut message = json!({"role": "assistant"});
        message["content"] = if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.clone())
        };
        if !calls.is_empty() {
            let wire_calls: Vec<Value> = calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id.clone().unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": Value::Object(call.arguments.clone()).to_string(),
                        },
                    })
                })
                .collect();
            message["tool_calls"] = Value::Array(wire_calls);
        }
        self.history.lock().expect("chat history poisoned").push(message);

        let mut parts = Vec::new();
        if !calls.is_empty() {
            parts.push(Part::FunctionCalls(calls));
        }
        ChatResponse {
            candidates: vec![Candidate { parts }],
            usage,
        }
    }
}

#[derive(serde::Deserialize)]
struct ModelListing {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(serde::Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(serde::Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(serde::Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
}

#[derive(serde::Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(serde::Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(serde::Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(serde::Deserialize, Clone)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl WireUsage {
    fn into_usage(self, provider: &str, model: &str) -> Usage {
        Usage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            provider: provider.to_string(),
            model: model.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FunctionCallResult;

    #[test]
    fn schema_downgrades_integer_and_keeps_required() {
        let schema = Schema::object()
            .with_property("count", Schema::of(SchemaType::Integer))
            .with_property("name", Schema::string("resource name"))
            .with_required(&["name"]);
        let translated = to_openai_schema(&schema);

        assert_eq!(translated["type"], "object");
        assert_eq!(translated["properties"]["count"]["type"], "number");
        assert_eq!(translated["properties"]["name"]["type"], "string");
        assert_eq!(translated["required"], json!(["name"]));
    }

    #[test]
    fn empty_object_still_serializes_properties() {
        let translated = to_openai_schema(&Schema::object());
        assert_eq!(translated["properties"], json!({}));
    }

    #[test]
    fn array_without_items_defaults_to_string_items() {
        let translated = to_openai_schema(&Schema::of(SchemaType::Array));
        assert_eq!(translated["items"], json!({"type": "string"}));
    }

    #[test]
    fn accumulator_reassembles_split_tool_call() {
        let mut acc = StreamAccumulator::new();
        acc.process(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "kubectl", "arguments": "{\"comm"}}
            ]}}]
        }));
        acc.process(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "and\":\"kubectl get pods\"}"}}
            ]}}]
        }));

        let (text, calls, _) = acc.finish("openai", "gpt-4.1");
        assert!(text.is_empty());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "kubectl");
        assert_eq!(calls[0].arguments["command"], "kubectl get pods");
    }

    #[test]
    fn accumulator_concatenates_text_chunks() {
        let mut acc = StreamAccumulator::new();
        let a = acc.process(&json!({"choices": [{"delta": {"content": "pods are "}}]}));
        let b = acc.process(&json!({"choices": [{"delta": {"content": "healthy"}}]}));
        assert_eq!(a.as_deref(), Some("pods are "));
        assert_eq!(b.as_deref(), Some("healthy"));

        let (text, calls, _) = acc.finish("openai", "gpt-4.1");
        assert_eq!(text, "pods are healthy");
        assert!(calls.is_empty());
    }

    #[test]
    fn accumulator_drops_unparseable_arguments() {
        let mut acc = StreamAccumulator::new();
        acc.process(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "x", "function": {"name": "bash", "arguments": "{not json"}}
            ]}}]
        }));
        let (_, calls, _) = acc.finish("openai", "gpt-4.1");
        assert!(calls.is_empty());
    }

    #[test]
    fn terminal_delta_fallback_recovers_complete_call() {
        let mut acc = StreamAccumulator::new();
        // A delta whose name never arrives through accumulation but whose
        // terminal form is complete.
        let delta = json!({
            "choices": [{"delta": {"tool_calls": [
                {"function": {"name": "", "arguments": ""}}
            ]}}]
        });
        acc.process(&delta);
        acc.last_tool_delta = Some(json!({
            "tool_calls": [
                {"id": "call_9", "function": {"name": "kubectl", "arguments": "{\"command\":\"kubectl get ns\"}"}}
            ]
        }));
        let (_, calls, _) = acc.finish("openai", "gpt-4.1");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_9"));
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let message = wire_message(&Content::ToolResult(FunctionCallResult {
            id: Some("call_3".into()),
            name: "kubectl".into(),
            result: json!({"stdout": "ok"}),
            error: None,
        }));
        assert_eq!(message["role"], "tool");
        assert_eq!(message["tool_call_id"], "call_3");
    }
}
