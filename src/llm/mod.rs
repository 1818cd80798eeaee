//! # LLM abstraction layer
//!
//! A provider-agnostic surface over chat-capable language models. The
//! pieces fit together like this:
//!
//! - [`types`] defines the uniform request/response shapes (schemas,
//!   function calls, candidates, parts, usage).
//! - [`traits`] defines the [`Client`] and [`Chat`] contracts every
//!   backend implements.
//! - [`registry`] maps a provider id (`gemini`, `bedrock://…`) to a
//!   factory that builds a client.
//! - [`retry`] wraps a chat with bounded exponential backoff.
//! - [`providers`] holds the concrete adapters.

pub mod error;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::LlmError;
pub use registry::{new_client, register, register_defaults};
pub use retry::{RetryChat, RetryConfig};
pub use traits::{Chat, Client};
pub use types::{
    Candidate, ChatResponse, ChatStream, CompletionRequest, CompletionResponse, Content,
    FunctionCall, FunctionCallResult, FunctionDefinition, Part, Schema, SchemaType, Usage,
};
