//! Client and Chat contracts implemented by every provider adapter.

use std::fmt::Debug;

use async_trait::async_trait;

use super::error::LlmError;
use super::types::{
    ChatResponse, ChatStream, CompletionRequest, CompletionResponse, Content, FunctionDefinition,
};

/// A connection to one LLM backend.
///
/// Capability probes let callers check support before committing to a
/// chat; `start_chat` enforces the adapter's model policy and fails with a
/// configuration error for models outside it.
#[async_trait]
pub trait Client: Send + Sync + Debug {
    /// Model identifiers this backend advertises.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    /// One-shot text completion outside any chat.
    async fn generate_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError>;

    /// Open a multi-turn chat with the given system prompt and model.
    fn start_chat(&self, system_prompt: &str, model: &str) -> Result<Box<dyn Chat>, LlmError>;

    fn supports_tools(&self, model: &str) -> bool;

    fn supports_streaming(&self, model: &str) -> bool;

    /// Release underlying resources. HTTP transports close on drop, so
    /// the default is a no-op; adapters with extra cleanup override it.
    fn close(&self) {}
}

/// A multi-turn conversation owning its history.
#[async_trait]
pub trait Chat: Send + Sync + Debug {
    /// Send one turn's contents and wait for the full response.
    async fn send(&mut self, contents: &[Content]) -> Result<ChatResponse, LlmError>;

    /// Send one turn's contents and stream partial responses.
    ///
    /// The returned stream is single-pass; the caller must drain it to
    /// release the transport. Mid-stream failures are yielded as errors.
    async fn send_streaming(&mut self, contents: &[Content]) -> Result<ChatStream, LlmError>;

    /// Replace (not append to) the tool catalog for this chat.
    fn set_function_definitions(&mut self, defs: &[FunctionDefinition]) -> Result<(), LlmError>;

    /// Provider-specific retryability, consulted by the retry decorator.
    fn is_retryable_error(&self, err: &LlmError) -> bool {
        err.is_retryable()
    }
}
