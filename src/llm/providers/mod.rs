//! Provider adapters.
//!
//! Each adapter translates the uniform content list into its backend's
//! native request, translates the uniform [`crate::llm::Schema`] into the
//! backend's schema dialect, and decodes responses (including streaming
//! deltas) back into the uniform shape.

mod base;
pub mod bedrock;
pub mod gemini;
pub mod ollama;
pub mod openai;

pub(crate) use base::HttpBase;

use std::sync::Arc;

use super::error::LlmError;
use super::registry::register;
use super::traits::Client;

/// Register every built-in provider scheme.
pub fn register_all() -> Result<(), LlmError> {
    register("gemini", |uri| {
        Ok(Arc::new(gemini::GeminiClient::from_uri(uri, gemini::Flavor::GoogleAi)?) as Arc<dyn Client>)
    })?;
    register("vertexai", |uri| {
        Ok(Arc::new(gemini::GeminiClient::from_uri(uri, gemini::Flavor::VertexAi)?) as Arc<dyn Client>)
    })?;
    register("openai", |uri| {
        Ok(Arc::new(openai::OpenAiClient::from_uri(uri, openai::Flavor::OpenAi)?) as Arc<dyn Client>)
    })?;
    register("azopenai", |uri| {
        Ok(Arc::new(openai::OpenAiClient::from_uri(uri, openai::Flavor::Azure)?) as Arc<dyn Client>)
    })?;
    register("grok", |uri| {
        Ok(Arc::new(openai::OpenAiClient::from_uri(uri, openai::Flavor::Grok)?) as Arc<dyn Client>)
    })?;
    register("llamacpp", |uri| {
        Ok(Arc::new(openai::OpenAiClient::from_uri(uri, openai::Flavor::LlamaCpp)?) as Arc<dyn Client>)
    })?;
    register("ollama", |uri| {
        Ok(Arc::new(ollama::OllamaClient::from_uri(uri)?) as Arc<dyn Client>)
    })?;
    register("bedrock", |uri| {
        Ok(Arc::new(bedrock::BedrockClient::from_uri(uri)?) as Arc<dyn Client>)
    })?;
    Ok(())
}
