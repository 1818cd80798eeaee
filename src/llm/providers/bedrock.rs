//! AWS Bedrock adapter (Converse API).
//!
//! Region and credentials are validated before any network call. The
//! model allowlist is configuration: `BEDROCK_ALLOWED_MODELS` (comma
//! separated) replaces the built-in default list, which mirrors the
//! models generally available in us-west-2. ARNs naming an inference
//! profile are always accepted.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::base::{AuthMode, HttpBase};
use crate::llm::error::LlmError;
use crate::llm::registry::ProviderUri;
use crate::llm::traits::{Chat, Client};
use crate::llm::types::{
    Candidate, ChatResponse, ChatStream, CompletionRequest, CompletionResponse, Content,
    FunctionCall, FunctionDefinition, Part, Usage,
};

const DEFAULT_REGION: &str = "us-west-2";
const DEFAULT_MODEL: &str = "us.anthropic.claude-sonnet-4-20250514-v1:0";
const MAX_TOKENS: u32 = 64000;
const TEMPERATURE: f64 = 0.1;
const TOP_P: f64 = 0.9;

const DEFAULT_ALLOWED_MODELS: &[&str] = &[
    "us.anthropic.claude-sonnet-4-20250514-v1:0",
    "us.anthropic.claude-3-7-sonnet-20250219-v1:0",
    "us.amazon.nova-pro-v1:0",
    "us.amazon.nova-lite-v1:0",
    "us.amazon.nova-micro-v1:0",
    "anthropic.claude-v2:1",
    "amazon.nova-pro-v1:0",
];

#[derive(Debug)]
pub struct BedrockClient {
    base: HttpBase,
    region: String,
    default_model: String,
    allowed_models: Vec<String>,
}

impl BedrockClient {
    pub fn from_uri(uri: &ProviderUri) -> Result<Self, LlmError> {
        let region = resolve_region(uri.host.as_deref())?;
        let auth = resolve_credentials()?;
        let default_model = std::env::var("BEDROCK_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let allowed_models = std::env::var("BEDROCK_ALLOWED_MODELS")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .map(|raw| raw.split(',').map(|m| m.trim().to_string()).collect())
            .unwrap_or_else(|| DEFAULT_ALLOWED_MODELS.iter().map(|m| m.to_string()).collect());

        let endpoint = format!("https://bedrock-runtime.{region}.amazonaws.com");
        Ok(Self {
            base: HttpBase::new("bedrock", endpoint, auth),
            region,
            default_model,
            allowed_models,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    fn is_model_supported(&self, model: &str) -> bool {
        if model.is_empty() {
            return false;
        }
        let lower = model.to_ascii_lowercase();
        if self
            .allowed_models
            .iter()
            .any(|allowed| allowed.to_ascii_lowercase() == lower)
        {
            return true;
        }
        // Inference profiles and foundation-model ARNs pass through; the
        // service itself is the authority on those.
        if lower.contains("arn:aws:bedrock") {
            if lower.contains("inference-profile") {
                return true;
            }
            if lower.contains("foundation-model") {
                if let Some(extracted) = model.rsplit('/').next() {
                    return self.is_model_supported(extracted);
                }
            }
        }
        false
    }

    fn converse_url(&self, model: &str) -> String {
        self.base
            .build_url(&format!("model/{}/converse", encode_model_id(model)))
    }
}

/// Region priority: provider URI host, then `AWS_REGION`, then the
/// adapter default. A host region and an env region that disagree are a
/// configuration error surfaced before any network call.
fn resolve_region(host: Option<&str>) -> Result<String, LlmError> {
    let host_region = host.and_then(region_from_host);
    let env_region = std::env::var("AWS_REGION").ok().filter(|r| !r.trim().is_empty());

    match (host_region, env_region) {
        (Some(from_host), Some(from_env)) if from_host != from_env => {
            Err(LlmError::configuration(format!(
                "region mismatch: provider URI says {from_host:?} but AWS_REGION says {from_env:?}"
            )))
        }
        (Some(region), _) | (None, Some(region)) => Ok(region),
        (None, None) => Ok(DEFAULT_REGION.to_string()),
    }
}

/// `bedrock.us-east-1.amazonaws.com` → `us-east-1`.
fn region_from_host(host: &str) -> Option<String> {
    let mut parts = host.split('.');
    let first = parts.next()?;
    if !first.starts_with("bedrock") {
        return None;
    }
    let region = parts.next()?;
    if region == "amazonaws" {
        return None;
    }
    Some(region.to_string())
}

/// Auth priority: `AWS_BEARER_TOKEN_BEDROCK` wins over the key/secret
/// pair. Key/secret alone requires SigV4 signing, which this build does
/// not carry; the error directs the operator at bearer auth. Neither set
/// is `credentials missing`.
fn resolve_credentials() -> Result<AuthMode, LlmError> {
    if let Ok(token) = std::env::var("AWS_BEARER_TOKEN_BEDROCK") {
        if !token.trim().is_empty() {
            return Ok(AuthMode::Bearer(token));
        }
    }
    let key = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.trim().is_empty());
    let secret = std::env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty());
    if key.is_some() && secret.is_some() {
        return Err(LlmError::configuration(
            "bedrock key/secret auth requires SigV4 signing; set AWS_BEARER_TOKEN_BEDROCK instead",
        ));
    }
    Err(LlmError::configuration(
        "credentials missing: set AWS_BEARER_TOKEN_BEDROCK (or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY)",
    ))
}

fn encode_model_id(model: &str) -> String {
    model.replace(':', "%3A").replace('/', "%2F")
}

#[async_trait]
impl Client for BedrockClient {
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.allowed_models.clone())
    }

    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut chat = self.start_chat("", &model)?;
        let response = chat.send(&[Content::UserText(request.prompt.clone())]).await?;
        let text = response.first().map(Candidate::text).unwrap_or_default();
        Ok(CompletionResponse {
            text,
            usage: response.usage,
        })
    }

    fn start_chat(&self, system_prompt: &str, model: &str) -> Result<Box<dyn Chat>, LlmError> {
        let model = if model.is_empty() {
            self.default_model.clone()
        } else {
            model.to_string()
        };
        if !self.is_model_supported(&model) {
            return Err(LlmError::configuration(format!(
                "model not supported: {model:?} is not in the bedrock allowlist for {}",
                self.region
            )));
        }
        Ok(Box::new(BedrockChat {
            base: self.base.clone(),
            converse_url: self.converse_url(&model),
            model,
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
            tool_config: None,
        }))
    }

    fn supports_tools(&self, model: &str) -> bool {
        self.is_model_supported(model)
    }

    fn supports_streaming(&self, model: &str) -> bool {
        self.is_model_supported(model)
    }
}

#[derive(Debug)]
pub struct BedrockChat {
    base: HttpBase,
    converse_url: String,
    model: String,
    system_prompt: String,
    history: Vec<Value>,
    tool_config: Option<Value>,
}

impl BedrockChat {
    fn push_contents(&mut self, contents: &[Content]) {
        let mut result_blocks = Vec::new();
        for content in contents {
            match content {
                Content::UserText(text) | Content::SystemText(text) => {
                    self.history
                        .push(json!({"role": "user", "content": [{"text": text}]}));
                }
                Content::ToolResult(result) => {
                    let status = if result.error.is_some() { "error" } else { "success" };
                    let body = match &result.error {
                        Some(error) => json!({"error": error, "result": result.result}),
                        None => result.result.clone(),
                    };
                    result_blocks.push(json!({
                        "toolResult": {
                            "toolUseId": result.id.clone().unwrap_or_default(),
                            "content": [{"json": body}],
                            "status": status,
                        }
                    }));
                }
            }
        }
        if !result_blocks.is_empty() {
            self.history
                .push(json!({"role": "user", "content": result_blocks}));
        }
    }

    fn build_payload(&self) -> Value {
        let mut payload = json!({
            "messages": Value::Array(self.history.clone()),
            "inferenceConfig": {
                "maxTokens": MAX_TOKENS,
                "temperature": TEMPERATURE,
                "topP": TOP_P,
            },
        });
        if !self.system_prompt.is_empty() {
            payload["system"] = json!([{"text": self.system_prompt}]);
        }
        if let Some(tool_config) = &self.tool_config {
            payload["toolConfig"] = tool_config.clone();
        }
        payload
    }

    fn decode(&self, response: &Value) -> Result<ChatResponse, LlmError> {
        let provider = &self.base.provider;
        let message = response
            .get("output")
            .and_then(|o| o.get("message"))
            .ok_or_else(|| {
                LlmError::invalid_response(provider, format!("missing output.message in {response}"))
            })?;

        let mut parts = Vec::new();
        let mut calls = Vec::new();
        if let Some(blocks) = message.get("content").and_then(Value::as_array) {
            for block in blocks {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(Part::Text(text.to_string()));
                } else if let Some(tool_use) = block.get("toolUse") {
                    let name = tool_use.get("name").and_then(Value::as_str).unwrap_or_default();
                    if name.trim().is_empty() {
                        return Err(LlmError::invalid_response(
                            provider,
                            format!("toolUse with empty name in {block}"),
                        ));
                    }
                    let arguments = match tool_use.get("input") {
                        Some(Value::Object(map)) => map.clone(),
                        None | Some(Value::Null) => Map::new(),
                        Some(other) => {
                            return Err(LlmError::invalid_response(
                                provider,
                                format!("toolUse input is not an object: {other}"),
                            ));
                        }
                    };
                    calls.push(FunctionCall {
                        id: tool_use
                            .get("toolUseId")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        name: name.to_string(),
                        arguments,
                    });
                }
            }
        }
        if !calls.is_empty() {
            parts.push(Part::FunctionCalls(calls));
        }

        let usage = response.get("usage").map(|u| Usage {
            input_tokens: u.get("inputTokens").and_then(Value::as_u64).unwrap_or(0),
            output_tokens: u.get("outputTokens").and_then(Value::as_u64).unwrap_or(0),
            total_tokens: u.get("totalTokens").and_then(Value::as_u64).unwrap_or(0),
            provider: provider.clone(),
            model: self.model.clone(),
            timestamp: Utc::now(),
        });

        Ok(ChatResponse {
            candidates: vec![Candidate { parts }],
            usage,
        })
    }
}

#[async_trait]
impl Chat for BedrockChat {
    async fn send(&mut self, contents: &[Content]) -> Result<ChatResponse, LlmError> {
        self.push_contents(contents);
        let payload = self.build_payload();
        info!(
            provider = self.base.provider.as_str(),
            model = self.model.as_str(),
            "sending converse request"
        );
        let response: Value = self.base.post_json(&self.converse_url, &payload).await?;
        debug!("converse response received");

        let decoded = self.decode(&response)?;
        if let Some(message) = response.get("output").and_then(|o| o.get("message")) {
            self.history.push(message.clone());
        }
        Ok(decoded)
    }

    async fn send_streaming(&mut self, contents: &[Content]) -> Result<ChatStream, LlmError> {
        // ConverseStream uses the AWS binary event-stream framing, which
        // plain HTTPS decoding does not cover; the whole response is
        // delivered as a single terminal chunk instead.
        let response = self.send(contents).await?;
        let chunks: Vec<Result<ChatResponse, LlmError>> = vec![Ok(response)];
        Ok(futures::stream::iter(chunks).boxed())
    }

    fn set_function_definitions(&mut self, defs: &[FunctionDefinition]) -> Result<(), LlmError> {
        let tools: Vec<Value> = defs
            .iter()
            .map(|def| {
                json!({
                    "toolSpec": {
                        "name": def.name,
                        "description": def.description,
                        "inputSchema": {"json": super::openai::to_openai_schema(&def.parameters)},
                    }
                })
            })
            .collect();
        self.tool_config = Some(json!({"tools": tools}));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parsed_from_bedrock_host() {
        assert_eq!(
            region_from_host("bedrock.us-east-1.amazonaws.com").as_deref(),
            Some("us-east-1")
        );
        assert_eq!(
            region_from_host("bedrock-runtime.eu-west-1.amazonaws.com").as_deref(),
            Some("eu-west-1")
        );
        assert!(region_from_host("example.com").is_none());
    }

    // AWS_REGION is process-global, so all the cases share one test.
    #[test]
    fn region_env_interplay() {
        std::env::set_var("AWS_REGION", "eu-west-1");
        let err = resolve_region(Some("bedrock.us-east-1.amazonaws.com")).unwrap_err();
        assert!(err.to_string().contains("mismatch"), "{err}");

        std::env::set_var("AWS_REGION", "us-east-1");
        let region = resolve_region(Some("bedrock.us-east-1.amazonaws.com")).expect("resolves");
        assert_eq!(region, "us-east-1");

        std::env::remove_var("AWS_REGION");
        assert_eq!(resolve_region(None).expect("default"), DEFAULT_REGION);
    }

    #[test]
    fn inference_profile_arns_pass_the_allowlist() {
        let client = BedrockClient {
            base: HttpBase::new("bedrock", "https://example", AuthMode::None),
            region: DEFAULT_REGION.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            allowed_models: DEFAULT_ALLOWED_MODELS.iter().map(|m| m.to_string()).collect(),
        };
        assert!(client.is_model_supported(DEFAULT_MODEL));
        assert!(client.is_model_supported(
            "arn:aws:bedrock:us-west-2:123:inference-profile/us.anthropic.claude-sonnet-4"
        ));
        assert!(!client.is_model_supported("mystery-model"));
    }

    #[test]
    fn model_id_is_path_encoded() {
        assert_eq!(
            encode_model_id("us.amazon.nova-pro-v1:0"),
            "us.amazon.nova-pro-v1%3A0"
        );
    }
}
