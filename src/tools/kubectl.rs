//! The built-in `kubectl` tool.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use super::exec::{ExecResult, ExecutionContext, execute_shell};
use super::{Tool, ToolError};
use crate::llm::{FunctionDefinition, Schema};

const MODIFIES_RESOURCE_DESC: &str = "Whether the command modifies a kubernetes resource.
Possible values:
- \"yes\" if the command modifies a resource
- \"no\" if the command does not modify a resource
- \"unknown\" if the command's effect on the resource is unknown
";

/// True when `command` contains `kubectl <subcommand>` with a word
/// boundary after the subcommand, so `kubectl editor-plugin` stays legal.
pub(crate) fn has_kubectl_subcommand(command: &str, subcommand: &str) -> bool {
    let needle = format!("kubectl {subcommand}");
    let mut search_from = 0;
    while let Some(pos) = command[search_from..].find(&needle) {
        let end = search_from + pos + needle.len();
        match command[end..].chars().next() {
            None => return true,
            Some(c) if !c.is_ascii_alphanumeric() && c != '-' && c != '_' => return true,
            _ => search_from = end,
        }
    }
    false
}

/// Validate a command line against the operations the assistant refuses
/// to run. Returns the structured refusal, or `None` when the command is
/// allowed.
pub(crate) fn validate_command(command: &str) -> Option<ExecResult> {
    if command.trim().is_empty() {
        return Some(ExecResult::from_error("command not provided"));
    }
    if has_kubectl_subcommand(command, "edit") {
        return Some(ExecResult::from_error(
            "interactive mode not supported for kubectl, please use non-interactive commands",
        ));
    }
    if has_kubectl_subcommand(command, "port-forward") {
        return Some(ExecResult::from_error(
            "port-forwarding is not allowed because assistant is running in an unattended mode, please try some other alternative",
        ));
    }
    None
}

pub(crate) fn command_argument(tool: &str, args: &Map<String, Value>) -> Result<String, ToolError> {
    match args.get("command") {
        Some(Value::String(command)) => Ok(command.clone()),
        Some(other) => Err(ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("'command' must be a string, got {other}"),
        }),
        None => Ok(String::new()),
    }
}

pub struct KubectlTool;

#[async_trait]
impl Tool for KubectlTool {
    fn name(&self) -> &str {
        "kubectl"
    }

    fn description(&self) -> &str {
        "Executes a kubectl command against the user's Kubernetes cluster. Use this tool only when you need to query or modify the state of the user's Kubernetes cluster."
    }

    fn function_definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: Schema::object()
                .with_property(
                    "command",
                    Schema::string(
                        "The complete kubectl command to execute, including the kubectl prefix.",
                    ),
                )
                .with_property("modifies_resource", Schema::string(MODIFIES_RESOURCE_DESC))
                .with_required(&["command"]),
        }
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        args: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let command = command_argument(self.name(), &args)?;
        if let Some(refusal) = validate_command(&command) {
            info!(command, "kubectl command refused before execution");
            return Ok(serde_json::to_value(refusal).unwrap_or(Value::Null));
        }
        let result = execute_shell(ctx, &command).await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_is_refused_without_spawning() {
        let refusal = validate_command("kubectl edit deployment/app").expect("refused");
        assert!(refusal.error.unwrap().contains("interactive mode not supported"));
    }

    #[test]
    fn port_forward_is_refused() {
        let refusal = validate_command("kubectl port-forward svc/web 8080:80").expect("refused");
        assert!(refusal.error.unwrap().contains("port-forwarding is not allowed"));
    }

    #[test]
    fn empty_command_is_refused() {
        let refusal = validate_command("   ").expect("refused");
        assert_eq!(refusal.error.as_deref(), Some("command not provided"));
    }

    #[test]
    fn word_boundary_is_honored() {
        assert!(has_kubectl_subcommand("kubectl edit pod/a", "edit"));
        assert!(has_kubectl_subcommand("watch kubectl edit pod", "edit"));
        assert!(has_kubectl_subcommand("kubectl edit", "edit"));
        assert!(!has_kubectl_subcommand("kubectl editor-status", "edit"));
        assert!(!has_kubectl_subcommand("kubectl get pods", "edit"));
    }

    #[test]
    fn ordinary_commands_pass_validation() {
        assert!(validate_command("kubectl get pods -n default").is_none());
        assert!(validate_command("kubectl describe deployment app").is_none());
    }
}
