//! Structural argument validation.
//!
//! Proposed tool arguments are checked against the descriptor's input
//! schema before anything touches the network: required keys must be
//! present, unknown keys are rejected, and primitive types must match.
//! Only the structural subset of JSON Schema that discovery actually
//! produces is interpreted; unrecognized schema constructs pass through.

use serde_json::{Map, Value};

use crate::protocol::ToolDescriptor;

/// Validate `args` against the tool's input schema.
///
/// Returns all violations joined into one message so a caller can fix a
/// malformed invocation in a single round.
pub fn validate_arguments(descriptor: &ToolDescriptor, args: &Value) -> Result<(), String> {
    let schema = &descriptor.input_schema;

    let empty = Map::new();
    let args = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(format!(
                "arguments must be an object, got {}",
                type_name(other)
            ))
        }
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    let mut violations = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                violations.push(format!("missing required argument '{key}'"));
            }
        }
    }

    if let Some(properties) = properties {
        for (key, value) in args {
            match properties.get(key) {
                None => violations.push(format!("unknown argument '{key}'")),
                Some(spec) => {
                    if let Some(expected) = spec.get("type") {
                        if !type_matches(expected, value) {
                            violations.push(format!(
                                "argument '{key}' must be of type {}, got {}",
                                describe_expected(expected),
                                type_name(value)
                            ));
                        }
                    }
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations.join("; "))
    }
}

/// Match a value against a schema `type`, which may be a single name or an
/// array of alternatives.
fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => primitive_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| primitive_matches(name, value)),
        // A malformed type spec never rejects.
        _ => true,
    }
}

fn primitive_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown primitive name: accept rather than reject.
        _ => true,
    }
}

fn describe_expected(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "any".to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
