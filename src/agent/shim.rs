//! Tool-use shim for models without native function calling.
//!
//! The shim teaches the model a strict text envelope: a line starting
//! with the sentinel, followed by a single JSON object with exactly the
//! keys `name` and `arguments`, ending at end of line. Parsing is
//! line-oriented and rejects any variation, because a false positive
//! would run a command the model never asked for.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::llm::{FunctionCall, FunctionDefinition};

pub const SENTINEL: &str = "TOOL_CALL:";

/// Outcome of scanning one model response.
#[derive(Debug, Default, PartialEq)]
pub struct ShimParse {
    /// Non-envelope lines, joined back together.
    pub text: String,
    /// Calls synthesized from envelope lines, in order.
    pub calls: Vec<FunctionCall>,
}

/// Scan a response for envelope lines. Lines that carry the sentinel but
/// fail strict parsing are kept as plain text.
pub fn parse_response(content: &str) -> ShimParse {
    let mut parse = ShimParse::default();
    let mut text_lines = Vec::new();
    for line in content.lines() {
        match parse_envelope_line(line) {
            Some(call) => parse.calls.push(call),
            None => text_lines.push(line),
        }
    }
    parse.text = text_lines.join("\n").trim().to_string();
    parse
}

fn parse_envelope_line(line: &str) -> Option<FunctionCall> {
    let rest = line.trim_start().strip_prefix(SENTINEL)?;
    let value: Value = serde_json::from_str(rest.trim()).ok()?;
    let Value::Object(map) = value else {
        return None;
    };
    // Exactly {name, arguments}; anything else is a variation.
    if map.len() != 2 {
        return None;
    }
    let name = map.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match map.get("arguments")? {
        Value::Object(args) => args.clone(),
        Value::Null => Map::new(),
        _ => return None,
    };
    Some(FunctionCall {
        id: Some(format!("shim-{}", Uuid::new_v4())),
        name: name.to_string(),
        arguments,
    })
}

/// Extend a system prompt with the tool catalog and the envelope rules.
pub fn compose_system_prompt(base: &str, catalog: &[FunctionDefinition]) -> String {
    let mut prompt = String::new();
    if !base.trim().is_empty() {
        prompt.push_str(base.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("You can invoke the following tools:\n");
    for def in catalog {
        let schema = serde_json::to_string(&def.parameters).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str(&format!(
            "- {}: {}\n  parameters schema: {}\n",
            def.name,
            def.description.lines().next().unwrap_or_default(),
            schema
        ));
    }
    prompt.push_str(&format!(
        "\nTo invoke a tool, reply with a line of exactly this form and nothing else on it:\n\
         {SENTINEL} {{\"name\": \"<tool name>\", \"arguments\": {{...}}}}\n\
         One JSON object per line, no markdown fences, no trailing text. \
         When you have the final answer, reply with plain text and no {SENTINEL} line."
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_single_envelope_line() {
        let content = r#"TOOL_CALL: {"name": "kubectl", "arguments": {"command": "kubectl get pods"}}"#;
        let parse = parse_response(content);
        assert!(parse.text.is_empty());
        assert_eq!(parse.calls.len(), 1);
        assert_eq!(parse.calls[0].name, "kubectl");
        assert_eq!(parse.calls[0].arguments["command"], "kubectl get pods");
        assert!(parse.calls[0].id.is_some());
    }

    #[test]
    fn mixed_text_and_envelope_lines() {
        let content = "Let me check the pods.\nTOOL_CALL: {\"name\": \"kubectl\", \"arguments\": {}}\n";
        let parse = parse_response(content);
        assert_eq!(parse.text, "Let me check the pods.");
        assert_eq!(parse.calls.len(), 1);
    }

    #[test]
    fn variations_are_rejected_as_text() {
        // Extra key.
        let extra = r#"TOOL_CALL: {"name": "bash", "arguments": {}, "why": "because"}"#;
        assert!(parse_response(extra).calls.is_empty());
        // Arguments not an object.
        let bad_args = r#"TOOL_CALL: {"name": "bash", "arguments": "rm -rf /"}"#;
        assert!(parse_response(bad_args).calls.is_empty());
        // Missing name.
        let no_name = r#"TOOL_CALL: {"arguments": {}}"#;
        assert!(parse_response(no_name).calls.is_empty());
        // Broken JSON.
        let broken = r#"TOOL_CALL: {"name": "bash""#;
        assert!(parse_response(broken).calls.is_empty());
        // Sentinel mid-line is not an envelope.
        let mid_line = r#"run TOOL_CALL: {"name": "bash", "arguments": {}}"#;
        assert!(parse_response(mid_line).calls.is_empty());
    }

    #[test]
    fn plain_text_passes_through() {
        let parse = parse_response("pods are healthy");
        assert_eq!(parse.text, "pods are healthy");
        assert!(parse.calls.is_empty());
    }

    #[test]
    fn system_prompt_names_every_tool() {
        let catalog = vec![FunctionDefinition {
            name: "kubectl".to_string(),
            description: "Run kubectl".to_string(),
            parameters: crate::llm::Schema::object(),
        }];
        let prompt = compose_system_prompt("Be helpful.", &catalog);
        assert!(prompt.contains("Be helpful."));
        assert!(prompt.contains("kubectl"));
        assert!(prompt.contains(SENTINEL));
        // The schema is embedded so the model knows the argument shape.
        assert!(prompt.contains(&json!({"type": "object"}).to_string()));
    }
}
