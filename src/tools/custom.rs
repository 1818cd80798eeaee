//! Custom tools defined in YAML.
//!
//! A definition file holds a list of entries:
//!
//! ```yaml
//! - name: helm_list
//!   description: List installed helm releases
//!   command: "helm list -n {{namespace}}"
//!   command_desc: Template with the namespace substituted in
//!   parameters:
//!     type: object
//!     properties:
//!       namespace:
//!         type: string
//!         description: Namespace to inspect
//!     required: [namespace]
//! ```
//!
//! Argument values are shell-quoted before substitution so the LLM cannot
//! smuggle extra shell syntax through a parameter.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::exec::{ExecutionContext, execute_shell};
use super::{Tool, ToolError, ToolRegistry, is_valid_tool_name};
use crate::llm::{FunctionDefinition, Schema};

#[derive(Debug, Clone, Deserialize)]
pub struct CustomToolSpec {
    pub name: String,
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub command_desc: Option<String>,
    pub parameters: Schema,
}

pub struct CustomTool {
    spec: CustomToolSpec,
}

impl CustomTool {
    pub fn new(spec: CustomToolSpec) -> Result<Self, ToolError> {
        if !is_valid_tool_name(&spec.name) {
            return Err(ToolError::InvalidName {
                name: spec.name.clone(),
            });
        }
        Ok(Self { spec })
    }

    fn render_command(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let mut command = self.spec.command.clone();
        for (name, value) in args {
            let placeholder = format!("{{{{{name}}}}}");
            if !command.contains(&placeholder) {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            command = command.replace(&placeholder, &shell_quote(&rendered));
        }
        if command.contains("{{") {
            return Err(ToolError::InvalidArguments {
                tool: self.spec.name.clone(),
                reason: format!("unfilled placeholders remain in {command:?}"),
            });
        }
        Ok(command)
    }
}

/// Wrap a value in single quotes, escaping embedded single quotes, so the
/// shell treats it as one literal word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl Tool for CustomTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn function_definition(&self) -> FunctionDefinition {
        let mut description = self.spec.description.clone();
        if let Some(command_desc) = &self.spec.command_desc {
            description.push_str("\n");
            description.push_str(command_desc);
        }
        FunctionDefinition {
            name: self.spec.name.clone(),
            description,
            parameters: self.spec.parameters.clone(),
        }
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        args: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let command = self.render_command(&args)?;
        info!(tool = self.spec.name.as_str(), command, "running custom tool");
        let result = execute_shell(ctx, &command).await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }
}

/// Load custom tool definitions from a YAML file and register them.
pub fn load_custom_tools(registry: &ToolRegistry, path: &Path) -> Result<usize, ToolError> {
    let content = std::fs::read_to_string(path).map_err(|source| ToolError::Spawn { source })?;
    let specs: Vec<CustomToolSpec> =
        serde_yaml::from_str(&content).map_err(|err| ToolError::InvalidArguments {
            tool: path.display().to_string(),
            reason: format!("parsing custom tool file: {err}"),
        })?;
    let count = specs.len();
    for spec in specs {
        debug!(tool = spec.name.as_str(), "registering custom tool");
        registry.register(Arc::new(CustomTool::new(spec)?))?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(command: &str) -> CustomToolSpec {
        CustomToolSpec {
            name: "helm_list".to_string(),
            description: "List helm releases".to_string(),
            command: command.to_string(),
            command_desc: None,
            parameters: Schema::object()
                .with_property("namespace", Schema::string("namespace"))
                .with_required(&["namespace"]),
        }
    }

    #[test]
    fn substitution_quotes_values() {
        let tool = CustomTool::new(spec("helm list -n {{namespace}}")).expect("valid");
        let mut args = Map::new();
        args.insert("namespace".to_string(), json!("kube-system"));
        let command = tool.render_command(&args).expect("renders");
        assert_eq!(command, "helm list -n 'kube-system'");
    }

    #[test]
    fn injection_attempts_stay_quoted() {
        let tool = CustomTool::new(spec("helm list -n {{namespace}}")).expect("valid");
        let mut args = Map::new();
        args.insert("namespace".to_string(), json!("x'; rm -rf /; echo '"));
        let command = tool.render_command(&args).expect("renders");
        assert_eq!(command, r#"helm list -n 'x'\''; rm -rf /; echo '\'''"#);
    }

    #[test]
    fn unfilled_placeholder_is_an_error() {
        let tool = CustomTool::new(spec("helm list -n {{namespace}}")).expect("valid");
        let err = tool.render_command(&Map::new()).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn invalid_name_is_rejected() {
        let mut bad = spec("true");
        bad.name = "Helm List".to_string();
        assert!(CustomTool::new(bad).is_err());
    }

    #[test]
    fn yaml_definitions_load_and_register() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tools.yaml");
        std::fs::write(
            &path,
            r#"
- name: cluster_info
  description: Show cluster info
  command: "kubectl cluster-info"
  parameters:
    type: object
"#,
        )
        .expect("writes");

        let registry = ToolRegistry::new();
        let count = load_custom_tools(&registry, &path).expect("loads");
        assert_eq!(count, 1);
        assert!(registry.lookup("cluster_info").is_some());
    }
}
