//! Invariant: round-tripping the uniform schema through each provider's
//! dialect preserves type, the required set, the property-name set, and
//! recursive structure. The OpenAI integer→number downgrade is the one
//! documented exception.

use serde_json::Value;

use kubepilot::llm::providers::gemini::to_gemini_schema;
use kubepilot::llm::providers::openai::to_openai_schema;
use kubepilot::llm::{Schema, SchemaType};

fn sample_schema() -> Schema {
    Schema::object()
        .with_property(
            "command",
            Schema::string("The complete command line to execute."),
        )
        .with_property("replicas", Schema::of(SchemaType::Integer))
        .with_property("dry_run", Schema::of(SchemaType::Boolean))
        .with_property("selectors", {
            let mut array = Schema::of(SchemaType::Array);
            array.items = Some(Box::new(Schema::string("label selector")));
            array
        })
        .with_property(
            "filters",
            Schema::object()
                .with_property("namespace", Schema::string("namespace"))
                .with_property("limit", Schema::of(SchemaType::Number))
                .with_required(&["namespace"]),
        )
        .with_required(&["command", "filters"])
}

/// Semantic comparison between the uniform schema and a translated JSON
/// form. `allow_integer_downgrade` documents the OpenAI exception.
fn assert_semantically_equal(
    original: &Schema,
    translated: &Value,
    allow_integer_downgrade: bool,
    path: &str,
) {
    let translated_type = translated
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let expected = match original.schema_type {
        SchemaType::Object => "object",
        SchemaType::String => "string",
        SchemaType::Number => "number",
        SchemaType::Integer if allow_integer_downgrade => "number",
        SchemaType::Integer => "integer",
        SchemaType::Boolean => "boolean",
        SchemaType::Array => "array",
    };
    assert_eq!(translated_type, expected, "type mismatch at {path}");

    // Required set is preserved exactly.
    let translated_required: Vec<String> = translated
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut expected_required = original.required.clone();
    expected_required.sort();
    let mut got_required = translated_required;
    got_required.sort();
    assert_eq!(got_required, expected_required, "required mismatch at {path}");

    // Property-name set is preserved; recurse into each.
    let translated_props = translated.get("properties").and_then(Value::as_object);
    let translated_names: Vec<&String> = translated_props
        .map(|props| props.keys().collect())
        .unwrap_or_default();
    let mut expected_names: Vec<&String> = original.properties.keys().collect();
    expected_names.sort();
    let mut got_names = translated_names;
    got_names.sort();
    assert_eq!(got_names, expected_names, "property names mismatch at {path}");

    for (name, prop) in &original.properties {
        let child = translated_props
            .and_then(|props| props.get(name))
            .unwrap_or_else(|| panic!("missing property {name} at {path}"));
        assert_semantically_equal(prop, child, allow_integer_downgrade, &format!("{path}.{name}"));
    }

    if let Some(items) = &original.items {
        let translated_items = translated
            .get("items")
            .unwrap_or_else(|| panic!("missing items at {path}"));
        assert_semantically_equal(
            items,
            translated_items,
            allow_integer_downgrade,
            &format!("{path}[]"),
        );
    }
}

#[test]
fn openai_translation_preserves_semantics() {
    let schema = sample_schema();
    let translated = to_openai_schema(&schema);
    assert_semantically_equal(&schema, &translated, true, "$");
}

#[test]
fn gemini_translation_preserves_semantics() {
    let schema = sample_schema();
    let translated = to_gemini_schema(&schema);
    assert_semantically_equal(&schema, &translated, false, "$");
}

#[test]
fn mcp_json_schema_roundtrip_preserves_semantics() {
    // Server-provided JSON schemas convert into the uniform form and back
    // out through the OpenAI dialect without losing structure.
    let schema = sample_schema();
    let as_json = to_openai_schema(&schema);
    let recovered = kubepilot::mcp::schema_from_json(&as_json);

    assert_eq!(recovered.schema_type, SchemaType::Object);
    let mut expected_names: Vec<&String> = schema.properties.keys().collect();
    expected_names.sort();
    let mut got_names: Vec<&String> = recovered.properties.keys().collect();
    got_names.sort();
    assert_eq!(got_names, expected_names);

    let mut expected_required = schema.required.clone();
    expected_required.sort();
    let mut got_required = recovered.required.clone();
    got_required.sort();
    assert_eq!(got_required, expected_required);
}
