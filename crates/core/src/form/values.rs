use std::collections::BTreeMap;

use serde_json::Value;

/// Field name → current value.
pub type FieldValues = BTreeMap<String, Value>;

/// Whether a value counts as filled in: non-empty strings, any number,
/// `true`, and any array or object.
pub fn is_filled_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Whether every named field is filled. An empty list checks all fields.
pub fn fields_filled(values: &FieldValues, fields: &[&str]) -> bool {
    if fields.is_empty() {
        return values.values().all(is_filled_value);
    }
    fields.iter().all(|field| values.get(*field).is_some_and(is_filled_value))
}

/// Field-by-field deep comparison. A missing field equals `null`.
pub fn values_differ(a: &FieldValues, b: &FieldValues) -> bool {
    a.keys().chain(b.keys()).any(|field| a.get(field).unwrap_or(&Value::Null) != b.get(field).unwrap_or(&Value::Null))
}
