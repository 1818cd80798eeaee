//! # Agent strategy
//!
//! The reason-act loop: drive the LLM, execute the tool calls it asks
//! for, feed results back, and stop on a final answer or when the
//! iteration budget runs out. A text-envelope shim covers models without
//! native function calling.

pub mod runner;
pub mod shim;

pub use runner::{Agent, AgentConfig, AgentError, AgentOutcome, AgentState};
pub use shim::{SENTINEL, compose_system_prompt, parse_response};
