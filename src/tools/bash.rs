//! The built-in `bash` tool.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use super::exec::{ExecutionContext, execute_shell};
use super::kubectl::{command_argument, validate_command};
use super::{Tool, ToolError};
use crate::llm::{FunctionDefinition, Schema};

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Executes a bash command. Use this tool only when you need to execute a shell command."
    }

    fn function_definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: Schema::object()
                .with_property("command", Schema::string("The bash command to execute."))
                .with_property(
                    "modifies_resource",
                    Schema::string(
                        "Whether the command modifies a kubernetes resource. \
                         Possible values: \"yes\", \"no\", \"unknown\".",
                    ),
                )
                .with_required(&["command"]),
        }
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        args: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let command = command_argument(self.name(), &args)?;
        // Embedded kubectl invocations face the same interactivity rules.
        if let Some(refusal) = validate_command(&command) {
            info!(command, "bash command refused before execution");
            return Ok(serde_json::to_value(refusal).unwrap_or(Value::Null));
        }
        let result = execute_shell(ctx, &command).await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }
}
