//! Uniform request/response types shared by all provider adapters.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::pin::Pin;

use super::error::LlmError;

/// Scalar and composite types a tool parameter schema may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

/// A recursive JSON-Schema-like structure describing tool parameters.
///
/// This is the provider-neutral form; each adapter translates it into its
/// backend's dialect. Translation must preserve the type, the required
/// list, the property-name set, and nested `properties`/`items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
}

impl Schema {
    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn string(description: impl Into<String>) -> Self {
        let mut s = Self::of(SchemaType::String);
        s.description = Some(description.into());
        s
    }

    pub fn of(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
            items: None,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, names: &[&str]) -> Self {
        self.required = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// Describes one callable tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

/// A model-produced request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The outcome of a tool invocation, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One turn's worth of content handed to [`super::Chat::send`].
///
/// A sum type rather than `Any`: unknown content is unconstructible, so
/// adapters never need a runtime type check.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    UserText(String),
    ToolResult(FunctionCallResult),
    /// Adapter-internal; user code passes system prompts via `start_chat`.
    SystemText(String),
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::UserText(value.to_string())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::UserText(value)
    }
}

impl From<FunctionCallResult> for Content {
    fn from(value: FunctionCallResult) -> Self {
        Content::ToolResult(value)
    }
}

/// An ordered piece of a candidate: text, or a batch of function calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCalls(Vec<FunctionCall>),
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(text) => Some(text),
            Part::FunctionCalls(_) => None,
        }
    }

    pub fn as_function_calls(&self) -> Option<&[FunctionCall]> {
        match self {
            Part::Text(_) => None,
            Part::FunctionCalls(calls) => Some(calls),
        }
    }
}

/// One alternative response from the model; the agent consumes the first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub parts: Vec<Part>,
}

impl Candidate {
    /// Concatenated text across all text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }

    /// All function calls, in declared order.
    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.parts
            .iter()
            .filter_map(Part::as_function_calls)
            .flatten()
            .cloned()
            .collect()
    }
}

/// Token accounting attached to a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded model response in the uniform shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub candidates: Vec<Candidate>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                parts: vec![Part::Text(text.into())],
            }],
            usage: None,
        }
    }

    /// First candidate, if any.
    pub fn first(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

/// Lazy single-pass sequence of partial responses.
///
/// Text parts across chunks concatenate to the final assistant text; the
/// terminal chunk carries usage metadata when the provider reports it.
/// Consumers must drain the stream to release the transport.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatResponse, LlmError>> + Send>>;

/// Single-shot completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub prompt: String,
}

/// Single-shot completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Option<Usage>,
}
