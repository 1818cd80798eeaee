//! # Tool runtime
//!
//! Tools are the agent's only way to act on the cluster. Built-in tools
//! (`kubectl`, `bash`) shell out through a common executor; custom tools
//! come from YAML definitions; MCP tools are registered by the federation
//! layer under the same trait.

pub mod bash;
pub mod custom;
pub mod exec;
pub mod kubectl;

pub use bash::BashTool;
pub use custom::{CustomTool, load_custom_tools};
pub use exec::{ExecResult, ExecutionContext};
pub use kubectl::KubectlTool;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::FunctionDefinition;

/// A named operation the LLM may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier passed to the LLM; constrained to conservative
    /// characters so every provider accepts it.
    fn name(&self) -> &str;

    /// Hint to the LLM on when to use the tool.
    fn description(&self) -> &str;

    /// Full parameter schema advertised to the LLM.
    fn function_definition(&self) -> FunctionDefinition;

    /// Invoke the tool. Validation failures come back as structured
    /// results inside `Ok` so the LLM can observe and correct; only
    /// unexpected execution failures produce `Err`.
    async fn run(
        &self,
        ctx: &ExecutionContext,
        args: Map<String, Value>,
    ) -> Result<Value, ToolError>;
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {name:?} is already registered")]
    Duplicate { name: String },

    #[error("tool name {name:?} is not a valid function-call identifier")]
    InvalidName { name: String },

    #[error("tool registered after the registry was first used")]
    RegistryFrozen,

    #[error("invalid arguments for tool {tool:?}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("failed to spawn command: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("tool {tool:?} failed: {message}")]
    Execution {
        tool: String,
        message: String,
        /// Transient failures (e.g. a disconnected MCP server) are marked
        /// retryable so the LLM can back off and try again.
        retryable: bool,
    },
}

/// Checks the conservative identifier grammar `[a-z][a-z0-9_-]{0,63}`.
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    if name.len() > 64 {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Registry of tools, keyed by name.
///
/// The process-wide instance is written during startup only; the first
/// lookup freezes it so the catalog the LLM saw stays consistent for the
/// whole session.
#[derive(Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    tools: HashMap<String, Arc<dyn Tool>>,
    frozen: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by the CLI entry point.
    pub fn global() -> &'static ToolRegistry {
        static GLOBAL: OnceLock<ToolRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ToolRegistry::new)
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if !is_valid_tool_name(&name) {
            return Err(ToolError::InvalidName { name });
        }
        let mut state = self.state.write().expect("tool registry poisoned");
        if state.frozen {
            return Err(ToolError::RegistryFrozen);
        }
        if state.tools.contains_key(&name) {
            return Err(ToolError::Duplicate { name });
        }
        state.tools.insert(name, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let mut state = self.state.write().expect("tool registry poisoned");
        state.frozen = true;
        state.tools.get(name).cloned()
    }

    /// Function definitions for every registered tool, sorted by name so
    /// the catalog the LLM sees is stable.
    pub fn catalog(&self) -> Vec<FunctionDefinition> {
        let state = self.state.read().expect("tool registry poisoned");
        let mut defs: Vec<FunctionDefinition> = state
            .tools
            .values()
            .map(|tool| tool.function_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let state = self.state.read().expect("tool registry poisoned");
        let mut names: Vec<String> = state.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Test-only: drop all registrations and unfreeze.
    pub fn reset_for_tests(&self) {
        let mut state = self.state.write().expect("tool registry poisoned");
        state.tools.clear();
        state.frozen = false;
    }
}

/// Register the built-in shell tools.
pub fn register_builtins(registry: &ToolRegistry) -> Result<(), ToolError> {
    registry.register(Arc::new(KubectlTool))?;
    registry.register(Arc::new(BashTool))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_follow_the_conservative_grammar() {
        assert!(is_valid_tool_name("kubectl"));
        assert!(is_valid_tool_name("get_current_time"));
        assert!(is_valid_tool_name("search-web"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("Kubectl"));
        assert!(!is_valid_tool_name("9lives"));
        assert!(!is_valid_tool_name("has space"));
        assert!(!is_valid_tool_name(&"a".repeat(65)));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(KubectlTool)).expect("first registration");
        let err = registry.register(Arc::new(KubectlTool)).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate { .. }));
    }

    #[test]
    fn registration_after_lookup_fails() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(KubectlTool)).expect("registers");
        assert!(registry.lookup("kubectl").is_some());
        let err = registry.register(Arc::new(BashTool)).unwrap_err();
        assert!(matches!(err, ToolError::RegistryFrozen));

        registry.reset_for_tests();
        registry.register(Arc::new(BashTool)).expect("registers after reset");
    }

    #[test]
    fn catalog_is_sorted_and_complete() {
        let registry = ToolRegistry::new();
        register_builtins(&registry).expect("builtins register");
        let names: Vec<String> = registry.catalog().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["bash".to_string(), "kubectl".to_string()]);
    }
}
