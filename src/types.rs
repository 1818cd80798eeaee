//! Domain types shared across the agent, session store, and UI layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Origin of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Agent,
    Tool,
}

impl MessageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageSource::User => "user",
            MessageSource::Agent => "agent",
            MessageSource::Tool => "tool",
        }
    }
}

/// Kind of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Text,
    ToolCallRequest,
    ToolCallResult,
    Error,
}

/// A single element of a session's conversation history.
///
/// Unknown fields encountered on disk are preserved in `extra` so that
/// histories written by newer builds survive a round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub source: MessageSource,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Payload of a message: plain text, a structured tool call, or a tool result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Call id linking a tool-call-result back to its tool-call-request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(MessageSource::User, MessageType::Text, MessagePayload {
            text: Some(text.into()),
            ..Default::default()
        })
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::new(MessageSource::Agent, MessageType::Text, MessagePayload {
            text: Some(text.into()),
            ..Default::default()
        })
    }

    pub fn tool_call_request(call_id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self::new(
            MessageSource::Agent,
            MessageType::ToolCallRequest,
            MessagePayload {
                call_id: Some(call_id.into()),
                tool_name: Some(tool.into()),
                arguments: Some(args),
                ..Default::default()
            },
        )
    }

    pub fn tool_call_result(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        result: Value,
        error: Option<String>,
    ) -> Self {
        Self::new(
            MessageSource::Tool,
            MessageType::ToolCallResult,
            MessagePayload {
                call_id: Some(call_id.into()),
                tool_name: Some(tool.into()),
                result: Some(result),
                error,
                ..Default::default()
            },
        )
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        Self::new(MessageSource::Agent, MessageType::Error, MessagePayload {
            text: Some(text.into()),
            ..Default::default()
        })
    }

    fn new(source: MessageSource, kind: MessageType, payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            kind,
            payload,
            timestamp: Utc::now(),
            extra: BTreeMap::new(),
        }
    }
}

/// Metadata for a persistent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub provider_id: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SessionInfo {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            created_at: now,
            last_modified: now,
            extra: BTreeMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}
