//! Argument validation against the JSON schema subset tools declare
//!
//! Supported keywords: `type` (including the integer/number split and type
//! lists), `required`, `properties`, `enum`, `items`. Anything else is
//! ignored.

use serde_json::{Map, Value};

use crate::error::ToolError;

/// Validate `args` against `schema`, reporting the first violation
pub fn validate(schema: &Value, args: &Value) -> Result<(), ToolError> {
    validate_at("arguments", schema, args)
}

fn validate_at(path: &str, schema: &Value, value: &Value) -> Result<(), ToolError> {
    let Some(schema) = schema.as_object() else {
        // `true`/`{}`-like schemas accept anything
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        check_type(path, expected, value)?;
    }

    if let Some(Value::Array(allowed)) = schema.get("enum")
        && !allowed.contains(value)
    {
        return Err(ToolError::Validation(format!(
            "{} must be one of {}",
            path,
            Value::Array(allowed.clone())
        )));
    }

    if let Value::Object(fields) = value {
        check_object(path, schema, fields)?;
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(&format!("{}[{}]", path, i), item_schema, item)?;
        }
    }

    Ok(())
}

fn check_object(path: &str, schema: &Map<String, Value>, fields: &Map<String, Value>) -> Result<(), ToolError> {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                return Err(ToolError::Validation(format!(
                    "{} is missing required field '{}'",
                    path, name
                )));
            }
        }
    }

    if let Some(Value::Object(properties)) = schema.get("properties") {
        for (name, property_schema) in properties {
            if let Some(field) = fields.get(name) {
                validate_at(&format!("{}.{}", path, name), property_schema, field)?;
            }
        }
    }

    Ok(())
}

fn check_type(path: &str, expected: &Value, value: &Value) -> Result<(), ToolError> {
    let matches = match expected {
        Value::String(name) => type_matches(name, value),
        Value::Array(names) => names.iter().filter_map(Value::as_str).any(|n| type_matches(n, value)),
        _ => true,
    };

    if matches {
        Ok(())
    } else {
        Err(ToolError::Validation(format!(
            "{} must be of type {}, got {}",
            path,
            match expected {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            type_name(value)
        )))
    }
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        // 3.0 counts as an integer, 3.5 does not
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
