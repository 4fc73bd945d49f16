//! Lightweight JSON schema checks
//!
//! Validates a JSON value against the subset of JSON Schema that tool
//! parameter declarations actually use: `type`, `properties`, `required`, and
//! `enum`. This is deliberately not a full schema engine; tools that need more
//! can validate inside `execute`.

use serde_json::Value;

/// Validate `input` against `schema`, collecting every violation
///
/// An empty or null schema accepts anything. Returns the list of violation
/// messages, empty on success.
pub fn check_against_schema(schema: &Value, input: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    check_value(schema, input, "$", &mut errors);
    errors
}

fn check_value(schema: &Value, input: &Value, path: &str, errors: &mut Vec<String>) {
    let obj = match schema.as_object() {
        Some(o) if !o.is_empty() => o,
        _ => return,
    };

    if let Some(expected) = obj.get("type").and_then(|t| t.as_str()) {
        if !type_matches(expected, input) {
            errors.push(format!(
                "{}: expected {}, got {}",
                path,
                expected,
                type_name(input)
            ));
            return;
        }
    }

    if let Some(allowed) = obj.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(input) {
            errors.push(format!("{}: value not in enum", path));
        }
    }

    if let Some(required) = obj.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if input.get(field).is_none() {
                errors.push(format!("{}: missing required field '{}'", path, field));
            }
        }
    }

    if let Some(properties) = obj.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in properties {
            if let Some(value) = input.get(name) {
                check_value(prop_schema, value, &format!("{}.{}", path, name), errors);
            }
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_schema_accepts_anything() {
        assert!(check_against_schema(&json!({}), &json!(42)).is_empty());
        assert!(check_against_schema(&Value::Null, &json!("text")).is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let schema = json!({"type": "object"});
        let errors = check_against_schema(&schema, &json!("not an object"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("expected object"));
    }

    #[test]
    fn test_required_fields() {
        let schema = json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        });

        assert!(check_against_schema(&schema, &json!({"query": "hi"})).is_empty());

        let errors = check_against_schema(&schema, &json!({}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("query"));
    }

    #[test]
    fn test_nested_property_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "label": {"type": "string"}
            }
        });

        let errors = check_against_schema(&schema, &json!({"count": "three", "label": 7}));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_enum_membership() {
        let schema = json!({
            "type": "string",
            "enum": ["add", "subtract"]
        });

        assert!(check_against_schema(&schema, &json!("add")).is_empty());
        assert_eq!(check_against_schema(&schema, &json!("divide")).len(), 1);
    }
}
