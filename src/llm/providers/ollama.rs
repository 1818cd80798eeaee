//! Ollama adapter (native `/api/chat`, JSON-lines streaming).

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::base::{AuthMode, HttpBase};
use super::openai::to_openai_schema;
use crate::llm::error::LlmError;
use crate::llm::registry::ProviderUri;
use crate::llm::traits::{Chat, Client};
use crate::llm::types::{
    Candidate, ChatResponse, ChatStream, CompletionRequest, CompletionResponse, Content,
    FunctionCall, FunctionDefinition, Part, Usage,
};

const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2";

#[derive(Debug)]
pub struct OllamaClient {
    base: HttpBase,
    default_model: String,
}

impl OllamaClient {
    pub fn from_uri(uri: &ProviderUri) -> Result<Self, LlmError> {
        let endpoint = uri
            .host
            .as_deref()
            .map(|h| format!("http://{h}"))
            .or_else(|| std::env::var("OLLAMA_HOST").ok().filter(|h| !h.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Ok(Self {
            base: HttpBase::new("ollama", endpoint, AuthMode::None),
            default_model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[async_trait]
impl Client for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.base.build_url("api/tags");
        let listing: Value = self.base.get_json(&url).await?;
        let models = listing
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let payload = json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": false,
        });
        let url = self.base.build_url("api/chat");
        let response: Value = self.base.post_json(&url, &payload).await?;
        let text = response
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::invalid_response(&self.base.provider, "missing message content"))?
            .to_string();
        Ok(CompletionResponse {
            text,
            usage: decode_usage(&self.base.provider, &model, &response),
        })
    }

    fn start_chat(&self, system_prompt: &str, model: &str) -> Result<Box<dyn Chat>, LlmError> {
        let model = if model.is_empty() {
            self.default_model.clone()
        } else {
            model.to_string()
        };
        Ok(Box::new(OllamaChat {
            base: self.base.clone(),
            model,
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
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
pub struct OllamaChat {
    base: HttpBase,
    model: String,
    system_prompt: String,
    history: Vec<Value>,
    tools: Option<Vec<Value>>,
}

impl OllamaChat {
    fn push_contents(&mut self, contents: &[Content]) {
        for content in contents {
            match content {
                Content::UserText(text) => {
                    self.history.push(json!({"role": "user", "content": text}));
                }
                Content::SystemText(text) => {
                    self.history.push(json!({"role": "system", "content": text}));
                }
                Content::ToolResult(result) => {
                    let body = match &result.error {
                        Some(error) => json!({"error": error, "result": result.result}),
                        None => result.result.clone(),
                    };
                    self.history.push(json!({
                        "role": "tool",
                        "tool_name": result.name,
                        "content": body.to_string(),
                    }));
                }
            }
        }
    }

    fn build_payload(&self, stream: bool) -> Value {
        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": self.system_prompt}));
        }
        messages.extend(self.history.iter().cloned());
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(tools) = &self.tools {
            payload["tools"] = Value::Array(tools.clone());
        }
        payload
    }

    fn decode_message(&self, message: &Value) -> Result<Vec<Part>, LlmError> {
        let provider = &self.base.provider;
        let mut parts = Vec::new();
        let text = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !text.is_empty() {
            parts.push(Part::Text(text.to_string()));
        }
        let mut calls = Vec::new();
        if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
            for tool_call in tool_calls {
                let function = tool_call.get("function").ok_or_else(|| {
                    LlmError::invalid_response(provider, format!("tool call missing function: {tool_call}"))
                })?;
                let name = function.get("name").and_then(Value::as_str).unwrap_or_default();
                if name.trim().is_empty() {
                    return Err(LlmError::invalid_response(
                        provider,
                        format!("tool call with empty name: {tool_call}"),
                    ));
                }
                let arguments = match function.get("arguments") {
                    Some(Value::Object(map)) => map.clone(),
                    Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                        Ok(Value::Object(map)) => map,
                        _ => {
                            return Err(LlmError::invalid_response(
                                provider,
                                format!("unparseable tool arguments: {raw:?}"),
                            ));
                        }
                    },
                    None | Some(Value::Null) => Map::new(),
                    Some(other) => {
                        return Err(LlmError::invalid_response(
                            provider,
                            format!("tool arguments are not an object: {other}"),
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
        if !calls.is_empty() {
            parts.push(Part::FunctionCalls(calls));
        }
        Ok(parts)
    }
}

#[async_trait]
impl Chat for OllamaChat {
    async fn send(&mut self, contents: &[Content]) -> Result<ChatResponse, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload(false);
        let url = self.base.build_url("api/chat");
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending chat request"
        );
        let response: Value = self.base.post_json(&url, &payload).await?;
        debug!("chat response received");

        let message = response
            .get("message")
            .ok_or_else(|| LlmError::invalid_response(&self.base.provider, "missing message"))?;
        let parts = self.decode_message(message)?;
        self.history.push(message.clone());
        Ok(ChatResponse {
            candidates: vec![Candidate { parts }],
            usage: decode_usage(&self.base.provider, &self.model, &response),
        })
    }

    async fn send_streaming(&mut self, contents: &[Content]) -> Result<ChatStream, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload(true);
        let url = self.base.build_url("api/chat");
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending streaming chat request"
        );
        let response = self.base.post_stream(&url, &payload).await?;
        let provider = self.base.provider.clone();
        let model = self.model.clone();

        // Ollama streams newline-delimited JSON objects; the terminal one
        // has "done": true and carries the token counts.
        let stream = futures::stream::unfold(
            OllamaStreamState {
                bytes: Box::pin(response.bytes_stream()),
                buffer: Vec::new(),
                provider,
                model,
                text: String::new(),
                done: false,
            },
            |mut state| async move {
                loop {
                    if state.done {
                        return None;
                    }
                    if let Some(line) = state.take_line() {
                        match serde_json::from_slice::<Value>(&line) {
                            Ok(payload) => {
                                let finished =
                                    payload.get("done").and_then(Value::as_bool).unwrap_or(false);
                                let delta = payload
                                    .get("message")
                                    .and_then(|m| m.get("content"))
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string();
                                if finished {
                                    state.done = true;
                                    let usage =
                                        decode_usage(&state.provider, &state.model, &payload);
                                    let mut response = ChatResponse {
                                        candidates: vec![Candidate { parts: Vec::new() }],
                                        usage,
                                    };
                                    if !delta.is_empty() {
                                        response.candidates[0].parts.push(Part::Text(delta));
                                    }
                                    return Some((Ok(response), state));
                                }
                                if !delta.is_empty() {
                                    state.text.push_str(&delta);
                                    return Some((Ok(ChatResponse::from_text(delta)), state));
                                }
                            }
                            Err(err) => {
                                warn!(%err, "dropping unparseable streaming line");
                            }
                        }
                        continue;
                    }
                    match state.bytes.next().await {
                        Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
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
                            return None;
                        }
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    fn set_function_definitions(&mut self, defs: &[FunctionDefinition]) -> Result<(), LlmError> {
        self.tools = Some(
            defs.iter()
                .map(|def| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": def.name,
                            "description": def.description,
                            "parameters": to_openai_schema(&def.parameters),
                        },
                    })
                })
                .collect(),
        );
        Ok(())
    }
}

struct OllamaStreamState {
    bytes: futures::stream::BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
    buffer: Vec<u8>,
    provider: String,
    model: String,
    text: String,
    done: bool,
}

impl OllamaStreamState {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return self.take_line();
        }
        Some(line)
    }
}

fn decode_usage(provider: &str, model: &str, response: &Value) -> Option<Usage> {
    let input = response.get("prompt_eval_count").and_then(Value::as_u64)?;
    let output = response.get("eval_count").and_then(Value::as_u64).unwrap_or(0);
    Some(Usage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        provider: provider.to_string(),
        model: model.to_string(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> OllamaChat {
        OllamaChat {
            base: HttpBase::new("ollama", DEFAULT_ENDPOINT, AuthMode::None),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            history: Vec::new(),
            tools: None,
        }
    }

    #[test]
    fn decodes_text_and_tool_calls() {
        let message = json!({
            "role": "assistant",
            "content": "checking",
            "tool_calls": [
                {"function": {"name": "kubectl", "arguments": {"command": "kubectl get pods"}}}
            ]
        });
        let parts = chat().decode_message(&message).expect("decodes");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_text(), Some("checking"));
        assert_eq!(parts[1].as_function_calls().unwrap()[0].name, "kubectl");
    }

    #[test]
    fn empty_tool_name_is_an_error() {
        let message = json!({
            "role": "assistant",
            "tool_calls": [{"function": {"name": "", "arguments": {}}}]
        });
        assert!(chat().decode_message(&message).is_err());
    }

    #[test]
    fn string_arguments_are_parsed() {
        let message = json!({
            "role": "assistant",
            "tool_calls": [
                {"function": {"name": "bash", "arguments": "{\"command\":\"date\"}"}}
            ]
        });
        let parts = chat().decode_message(&message).expect("decodes");
        let calls = parts[0].as_function_calls().expect("calls");
        assert_eq!(calls[0].arguments["command"], "date");
    }
}
