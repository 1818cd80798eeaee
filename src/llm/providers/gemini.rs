//! Gemini adapter (Google AI Studio and Vertex AI flavors).

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

const GOOGLE_AI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const API_PATH: &str = "v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Which Gemini surface the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    GoogleAi,
    VertexAi,
}

#[derive(Debug)]
pub struct GeminiClient {
    base: HttpBase,
    api_path: String,
}

impl GeminiClient {
    pub fn from_uri(uri: &ProviderUri, flavor: Flavor) -> Result<Self, LlmError> {
        match flavor {
            Flavor::GoogleAi => {
                let endpoint = uri
                    .host
                    .as_deref()
                    .map(|h| format!("https://{h}"))
                    .unwrap_or_else(|| GOOGLE_AI_ENDPOINT.to_string());
                Ok(Self {
                    base: HttpBase::new(
                        "gemini",
                        endpoint,
                        AuthMode::QueryKey(require_env("GEMINI_API_KEY")?),
                    ),
                    api_path: API_PATH.to_string(),
                })
            }
            Flavor::VertexAi => {
                // vertexai://{location}-aiplatform.googleapis.com?project=p&location=l
                let project = uri.query_param("project").map(str::to_string).ok_or_else(|| {
                    LlmError::configuration(
                        "vertexai requires a project, e.g. vertexai://host?project=my-project",
                    )
                })?;
                let location = uri
                    .query_param("location")
                    .unwrap_or("us-central1")
                    .to_string();
                let host = uri
                    .host
                    .clone()
                    .unwrap_or_else(|| format!("{location}-aiplatform.googleapis.com"));
                let token = require_env("VERTEXAI_ACCESS_TOKEN")?;
                Ok(Self {
                    base: HttpBase::new(
                        "vertexai",
                        format!("https://{host}"),
                        AuthMode::Bearer(token),
                    ),
                    api_path: format!(
                        "v1/projects/{project}/locations/{location}/publishers/google/models"
                    ),
                })
            }
        }
    }

    pub fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        self.base
            .build_url(&format!("{}/{model}:{method}", self.api_path))
    }
}

#[async_trait]
impl Client for GeminiClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.base.build_url(&self.api_path);
        let listing: ModelListing = self.base.get_json(&url).await?;
        Ok(listing
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }

    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
        });
        let url = self.model_url(&model, "generateContent");
        let response: Value = self.base.post_json(&url, &payload).await?;
        let (parts, usage) = decode_response(&self.base.provider, &model, &response)?;
        let text = parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("");
        Ok(CompletionResponse { text, usage })
    }

    fn start_chat(&self, system_prompt: &str, model: &str) -> Result<Box<dyn Chat>, LlmError> {
        let model = if model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            model.to_string()
        };
        if !model.starts_with("gemini-") {
            return Err(LlmError::configuration(format!(
                "model not supported: {model:?} is not a Gemini model"
            )));
        }
        Ok(Box::new(GeminiChat {
            base: self.base.clone(),
            generate_url: self.model_url(&model, "generateContent"),
            stream_url: format!("{}?alt=sse", self.model_url(&model, "streamGenerateContent")),
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
pub struct GeminiChat {
    base: HttpBase,
    generate_url: String,
    stream_url: String,
    model: String,
    system_prompt: String,
    // Wire-format `contents` entries, shared with in-flight streams.
    history: Arc<Mutex<Vec<Value>>>,
    tools: Option<Value>,
}

impl GeminiChat {
    fn push_contents(&self, contents: &[Content]) {
        let mut history = self.history.lock().expect("chat history poisoned");
        // Tool results for one turn group into a single user content entry
        // so the ids line up with the preceding functionCall parts.
        let mut result_parts = Vec::new();
        for content in contents {
            match content {
                Content::UserText(text) | Content::SystemText(text) => {
                    history.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
                Content::ToolResult(result) => {
                    let response = match &result.error {
                        Some(error) => json!({"error": error, "result": result.result}),
                        None => json!({"result": result.result}),
                    };
                    result_parts.push(json!({
                        "functionResponse": {"name": result.name, "response": response}
                    }));
                }
            }
        }
        if !result_parts.is_empty() {
            history.push(json!({"role": "user", "parts": result_parts}));
        }
    }

    fn build_payload(&self) -> Value {
        let history = self.history.lock().expect("chat history poisoned");
        let mut payload = json!({"contents": Value::Array(history.clone())});
        if !self.system_prompt.is_empty() {
            payload["system_instruction"] = json!({"parts": [{"text": self.system_prompt}]});
        }
        if let Some(tools) = &self.tools {
            payload["tools"] = tools.clone();
        }
        payload
    }

    fn record_model_turn(history: &Arc<Mutex<Vec<Value>>>, parts: &[Part]) {
        let mut wire_parts = Vec::new();
        for part in parts {
            match part {
                Part::Text(text) => wire_parts.push(json!({"text": text})),
                Part::FunctionCalls(calls) => {
                    for call in calls {
                        wire_parts.push(json!({
                            "functionCall": {
                                "name": call.name,
                                "args": Value::Object(call.arguments.clone()),
                            }
                        }));
                    }
                }
            }
        }
        if wire_parts.is_empty() {
            return;
        }
        history
            .lock()
            .expect("chat history poisoned")
            .push(json!({"role": "model", "parts": wire_parts}));
    }
}

#[async_trait]
impl Chat for GeminiChat {
    async fn send(&mut self, contents: &[Content]) -> Result<ChatResponse, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload();
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending chat request"
        );
        let response: Value = self.base.post_json(&self.generate_url, &payload).await?;
        debug!("chat response received");

        let (parts, usage) = decode_response(&self.base.provider, &self.model, &response)?;
        Self::record_model_turn(&self.history, &parts);
        Ok(ChatResponse {
            candidates: vec![Candidate { parts }],
            usage,
        })
    }

    async fn send_streaming(&mut self, contents: &[Content]) -> Result<ChatStream, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload();
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending streaming chat request"
        );
        let response = self.base.post_stream(&self.stream_url, &payload).await?;

        let provider = self.base.provider.clone();
        let model = self.model.clone();
        let history = Arc::clone(&self.history);
        let events = Box::pin(response.bytes_stream().eventsource());
        let stream = futures::stream::unfold(
            GeminiStreamState {
                events,
                provider,
                model,
                history,
                text: String::new(),
                calls: Vec::new(),
                usage: None,
                done: false,
            },
            |mut state| async move {
                loop {
                    if state.done {
                        return None;
                    }
                    match state.events.next().await {
                        Some(Ok(event)) => match serde_json::from_str::<Value>(&event.data) {
                            Ok(payload) => {
                                match decode_response(&state.provider, &state.model, &payload) {
                                    Ok((parts, usage)) => {
                                        if usage.is_some() {
                                            state.usage = usage;
                                        }
                                        let mut chunk_text = String::new();
                                        for part in parts {
                                            match part {
                                                Part::Text(text) => {
                                                    state.text.push_str(&text);
                                                    chunk_text.push_str(&text);
                                                }
                                                Part::FunctionCalls(calls) => {
                                                    state.calls.extend(calls);
                                                }
                                            }
                                        }
                                        if !chunk_text.is_empty() {
                                            return Some((
                                                Ok(ChatResponse::from_text(chunk_text)),
                                                state,
                                            ));
                                        }
                                    }
                                    Err(err) => {
                                        warn!(%err, "dropping undecodable streaming chunk");
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(%err, "dropping unparseable streaming delta");
                            }
                        },
                        Some(Err(err)) => {
                            state.done = true;
                            return Some((
                                Err(LlmError::invalid_response(
                                    state.provider.clone(),
                                    format!("stream transport error: {err}"),
                                )),
                                state,
                            ));
                        }
                        None => {
                            state.done = true;
                            let parts = if state.calls.is_empty() {
                                Vec::new()
                            } else {
                                vec![Part::FunctionCalls(std::mem::take(&mut state.calls))]
                            };
                            let mut record = parts.clone();
                            if !state.text.is_empty() {
                                record.insert(0, Part::Text(state.text.clone()));
                            }
                            GeminiChat::record_model_turn(&state.history, &record);
                            return Some((
                                Ok(ChatResponse {
                                    candidates: vec![Candidate { parts }],
                                    usage: state.usage.take(),
                                }),
                                state,
                            ));
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    fn set_function_definitions(&mut self, defs: &[FunctionDefinition]) -> Result<(), LlmError> {
        let declarations: Vec<Value> = defs
            .iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "parameters": to_gemini_schema(&def.parameters),
                })
            })
            .collect();
        self.tools = Some(json!([{"functionDeclarations": declarations}]));
        Ok(())
    }
}

/// Translate the uniform schema into Gemini's dialect (uppercase type
/// names, same recursive structure).
pub fn to_gemini_schema(schema: &Schema) -> Value {
    let type_name = match schema.schema_type {
        SchemaType::Object => "OBJECT",
        SchemaType::String => "STRING",
        SchemaType::Number => "NUMBER",
        SchemaType::Integer => "INTEGER",
        SchemaType::Boolean => "BOOLEAN",
        SchemaType::Array => "ARRAY",
    };
    let mut out = Map::new();
    out.insert("type".to_string(), Value::String(type_name.to_string()));
    if let Some(description) = &schema.description {
        out.insert("description".to_string(), Value::String(description.clone()));
    }
    if !schema.properties.is_empty() {
        let mut properties = Map::new();
        for (name, prop) in &schema.properties {
            properties.insert(name.clone(), to_gemini_schema(prop));
        }
        out.insert("properties".to_string(), Value::Object(properties));
    }
    if !schema.required.is_empty() {
        out.insert(
            "required".to_string(),
            Value::Array(schema.required.iter().cloned().map(Value::String).collect()),
        );
    }
    if let Some(items) = &schema.items {
        out.insert("items".to_string(), to_gemini_schema(items));
    }
    Value::Object(out)
}

fn decode_response(
    provider: &str,
    model: &str,
    response: &Value,
) -> Result<(Vec<Part>, Option<Usage>), LlmError> {
    let usage = response.get("usageMetadata").map(|meta| Usage {
        input_tokens: meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: meta
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_tokens: meta.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(0),
        provider: provider.to_string(),
        model: model.to_string(),
        timestamp: Utc::now(),
    });

    let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        // Streaming chunks may carry only usage metadata.
        if usage.is_some() {
            return Ok((Vec::new(), usage));
        }
        return Err(LlmError::invalid_response(
            provider,
            format!("missing candidates in {response}"),
        ));
    };

    let mut parts = Vec::new();
    let mut calls = Vec::new();
    if let Some(wire_parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for wire_part in wire_parts {
            if let Some(text) = wire_part.get("text").and_then(Value::as_str) {
                parts.push(Part::Text(text.to_string()));
            } else if let Some(call) = wire_part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.trim().is_empty() {
                    return Err(LlmError::invalid_response(
                        provider,
                        format!("function call with empty name in {wire_part}"),
                    ));
                }
                let arguments = match call.get("args") {
                    Some(Value::Object(map)) => map.clone(),
                    None | Some(Value::Null) => Map::new(),
                    Some(other) => {
                        return Err(LlmError::invalid_response(
                            provider,
                            format!("function call args are not an object: {other}"),
                        ));
                    }
                };
                calls.push(FunctionCall {
                    id: None,
                    name: name.to_string(),
                    arguments,
                });
            }
        }
    }
    if !calls.is_empty() {
        parts.push(Part::FunctionCalls(calls));
    }
    Ok((parts, usage))
}

struct GeminiStreamState {
    events: futures::stream::BoxStream<
        'static,
        Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>,
    >,
    provider: String,
    model: String,
    history: Arc<Mutex<Vec<Value>>>,
    text: String,
    calls: Vec<FunctionCall>,
    usage: Option<Usage>,
    done: bool,
}

#[derive(serde::Deserialize)]
struct ModelListing {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(serde::Deserialize)]
struct ModelEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_uses_uppercase_type_names() {
        let schema = Schema::object()
            .with_property("command", Schema::string("the command"))
            .with_property("count", Schema::of(SchemaType::Integer))
            .with_required(&["command"]);
        let translated = to_gemini_schema(&schema);

        assert_eq!(translated["type"], "OBJECT");
        assert_eq!(translated["properties"]["command"]["type"], "STRING");
        assert_eq!(translated["properties"]["count"]["type"], "INTEGER");
        assert_eq!(translated["required"], json!(["command"]));
    }

    #[test]
    fn decodes_text_and_function_calls() {
        let response = json!({
            "candidates": [{"content": {"parts": [
                {"text": "checking pods"},
                {"functionCall": {"name": "kubectl", "args": {"command": "kubectl get pods"}}}
            ]}}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        });
        let (parts, usage) = decode_response("gemini", "gemini-2.5-pro", &response).expect("decodes");

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_text(), Some("checking pods"));
        let calls = parts[1].as_function_calls().expect("function calls");
        assert_eq!(calls[0].name, "kubectl");
        assert_eq!(usage.expect("usage").total_tokens, 15);
    }

    #[test]
    fn empty_function_name_is_an_error() {
        let response = json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "", "args": {}}}
            ]}}]
        });
        assert!(decode_response("gemini", "m", &response).is_err());
    }

    #[test]
    fn non_gemini_model_is_rejected_at_chat_start() {
        let uri = ProviderUri {
            scheme: "gemini".into(),
            host: None,
            query: Vec::new(),
        };
        // Construct without touching the environment by faking the key.
        std::env::set_var("GEMINI_API_KEY", "test-key");
        let client = GeminiClient::from_uri(&uri, Flavor::GoogleAi).expect("builds");
        let err = client.start_chat("", "gpt-4.1").unwrap_err();
        assert!(err.to_string().contains("model not supported"));
    }
}
