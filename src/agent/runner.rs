//! The reason-act loop.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::shim;
use crate::llm::{Chat, Content, FunctionCall, FunctionCallResult, LlmError};
use crate::sessions::{MessageStore, SessionError, Store};
use crate::tools::{ExecutionContext, ToolError, ToolRegistry};
use crate::types::{Message, SessionInfo};
use crate::ui::{BlockPayload, Document};

/// Default LLM-turn budget for one user query.
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: u32,
    /// Text-envelope tool calling for models without the native kind.
    /// Off by default; false positives are unsafe.
    pub use_shim: bool,
    /// Stream partial text to the UI as it arrives.
    pub streaming: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            use_shim: false,
            streaming: false,
        }
    }
}

/// Loop state, tracked per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    AwaitingLlm,
    ExecutingTools,
    Done,
    Aborted,
}

#[derive(Debug)]
pub struct AgentOutcome {
    pub final_text: Option<String>,
    pub iterations: u32,
    pub tool_executions: u32,
    pub state: AgentState,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

pub struct Agent<'a> {
    chat: Box<dyn Chat>,
    registry: &'a ToolRegistry,
    store: Arc<dyn Store>,
    session: SessionInfo,
    exec_ctx: ExecutionContext,
    document: Arc<Document>,
    config: AgentConfig,
    definitions_installed: bool,
}

impl<'a> Agent<'a> {
    pub fn new(
        chat: Box<dyn Chat>,
        registry: &'a ToolRegistry,
        store: Arc<dyn Store>,
        session: SessionInfo,
        exec_ctx: ExecutionContext,
        document: Arc<Document>,
        config: AgentConfig,
    ) -> Self {
        Self {
            chat,
            registry,
            store,
            session,
            exec_ctx,
            document,
            config,
            definitions_installed: false,
        }
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Run one user query to completion.
    pub async fn run(&mut self, query: &str) -> Result<AgentOutcome, AgentError> {
        let messages = self.store.messages(&self.session.id);
        messages.append(&Message::user_text(query)).await?;
        self.touch().await?;

        info!(
            session = self.session.id.as_str(),
            max_iterations = self.config.max_iterations,
            "agent run started"
        );

        let mut state = AgentState::AwaitingLlm;
        let mut pending: Vec<Content> = vec![Content::UserText(query.to_string())];
        let mut iterations = 0u32;
        let mut tool_executions = 0u32;
        let mut final_text = None;

        while iterations < self.config.max_iterations {
            iterations += 1;
            state = AgentState::AwaitingLlm;

            // The catalog is installed once, on the first turn of the chat.
            if !self.definitions_installed && !self.config.use_shim {
                self.chat.set_function_definitions(&self.registry.catalog())?;
                self.definitions_installed = true;
            }

            debug!(iteration = iterations, "awaiting LLM turn");
            let (mut text, mut calls, text_already_rendered) = if self.config.streaming {
                let (text, calls) = self.streaming_turn(&pending).await?;
                (text, calls, true)
            } else {
                let response = self.chat.send(&pending).await?;
                let candidate = response.first().cloned().unwrap_or_default();
                (candidate.text(), candidate.function_calls(), false)
            };

            if self.config.use_shim && calls.is_empty() {
                let parse = shim::parse_response(&text);
                if !parse.calls.is_empty() {
                    text = parse.text;
                    calls = parse.calls;
                }
            }

            if !text.is_empty() {
                messages.append(&Message::agent_text(&text)).await?;
                if !text_already_rendered {
                    self.document.add_block(BlockPayload::agent_text(&text));
                }
            }

            if calls.is_empty() {
                state = AgentState::Done;
                final_text = Some(text);
                break;
            }

            state = AgentState::ExecutingTools;
            pending = Vec::new();
            // Declared order, sequential execution; results batch into a
            // single next send so the ids line up.
            for call in calls {
                let result = self.execute_call(&messages, call).await?;
                tool_executions += 1;
                if self.config.use_shim {
                    pending.push(Content::UserText(
                        json!({
                            "tool_result": {
                                "name": result.name,
                                "result": result.result,
                                "error": result.error,
                            }
                        })
                        .to_string(),
                    ));
                } else {
                    pending.push(Content::ToolResult(result));
                }
            }
            self.touch().await?;
        }

        if state != AgentState::Done {
            state = AgentState::Aborted;
            let message = format!(
                "iteration budget exhausted after {iterations} iterations; partial progress is preserved in the session"
            );
            warn!(session = self.session.id.as_str(), "{message}");
            messages.append(&Message::error_text(&message)).await?;
            self.document.add_block(BlockPayload::error(message));
            self.touch().await?;
        }

        info!(
            session = self.session.id.as_str(),
            iterations, tool_executions, ?state, "agent run finished"
        );
        Ok(AgentOutcome {
            final_text,
            iterations,
            tool_executions,
            state,
        })
    }

    /// Drain one streaming turn, forwarding text deltas to the UI.
    async fn streaming_turn(
        &mut self,
        pending: &[Content],
    ) -> Result<(String, Vec<FunctionCall>), AgentError> {
        let block = self.document.add_block(BlockPayload::streaming_text());
        let mut stream = self.chat.send_streaming(pending).await?;
        let mut text = String::new();
        let mut calls = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.document.set_streaming(block, false);
                    return Err(err.into());
                }
            };
            if let Some(candidate) = chunk.first() {
                for part in &candidate.parts {
                    match part {
                        crate::llm::Part::Text(delta) => {
                            text.push_str(delta);
                            self.document.append_text(block, delta);
                        }
                        crate::llm::Part::FunctionCalls(chunk_calls) => {
                            calls.extend(chunk_calls.clone());
                        }
                    }
                }
            }
        }
        self.document.set_streaming(block, false);
        Ok((text, calls))
    }

    /// Execute one tool call and append the request/result messages.
    async fn execute_call(
        &self,
        messages: &Arc<dyn MessageStore>,
        call: FunctionCall,
    ) -> Result<FunctionCallResult, AgentError> {
        let call_id = call
            .id
            .clone()
            .unwrap_or_else(|| format!("call-{}", Uuid::new_v4()));
        let args_value = Value::Object(call.arguments.clone());
        messages
            .append(&Message::tool_call_request(&call_id, &call.name, args_value.clone()))
            .await?;
        let block = self
            .document
            .add_block(BlockPayload::function_call(describe_call(&call)));

        let result = match self.registry.lookup(&call.name) {
            None => {
                warn!(tool = call.name.as_str(), "LLM requested unknown tool");
                FunctionCallResult {
                    id: Some(call_id.clone()),
                    name: call.name.clone(),
                    result: Value::Null,
                    error: Some(format!("tool not found: {:?}", call.name)),
                }
            }
            Some(tool) => match tool.run(&self.exec_ctx, call.arguments.clone()).await {
                Ok(value) => FunctionCallResult {
                    id: Some(call_id.clone()),
                    name: call.name.clone(),
                    result: value,
                    error: None,
                },
                // Transient tool failures go back to the LLM as results so
                // it can observe and correct; only unexpected executor
                // failures abort the loop.
                Err(ToolError::Execution { message, .. }) => FunctionCallResult {
                    id: Some(call_id.clone()),
                    name: call.name.clone(),
                    result: Value::Null,
                    error: Some(message),
                },
                Err(ToolError::InvalidArguments { reason, .. }) => FunctionCallResult {
                    id: Some(call_id.clone()),
                    name: call.name.clone(),
                    result: Value::Null,
                    error: Some(format!("invalid arguments: {reason}")),
                },
                Err(err) => return Err(err.into()),
            },
        };

        let rendered = match &result.error {
            Some(error) => json!({"error": error}),
            None => result.result.clone(),
        };
        self.document.set_result(block, rendered);
        messages
            .append(&Message::tool_call_result(
                &call_id,
                &call.name,
                result.result.clone(),
                result.error.clone(),
            ))
            .await?;
        info!(
            tool = call.name.as_str(),
            success = result.error.is_none(),
            "tool executed"
        );
        Ok(result)
    }

    async fn touch(&mut self) -> Result<(), AgentError> {
        self.session.touch();
        self.store.update(&self.session).await?;
        Ok(())
    }
}

fn describe_call(call: &FunctionCall) -> String {
    if let Some(command) = call.arguments.get("command").and_then(Value::as_str) {
        return command.to_string();
    }
    format!("{}({})", call.name, Value::Object(call.arguments.clone()))
}
