//! Field accessors over raw JSON that report the dotted path of the first
//! missing or mistyped field.

use serde_json::{Map, Value};

use super::EventError;

pub(crate) type Object = Map<String, Value>;

pub(crate) fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

pub(crate) fn invalid(field: impl Into<String>, expected: &'static str) -> EventError {
    EventError::FormatInvalid {
        field: field.into(),
        expected,
    }
}

pub(crate) fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Object, EventError> {
    value.as_object().ok_or_else(|| invalid(path, "object"))
}

pub(crate) fn required_object<'a>(
    obj: &'a Object,
    parent: &str,
    key: &str,
) -> Result<&'a Object, EventError> {
    let path = join(parent, key);
    obj.get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| invalid(path, "object"))
}

/// `Ok(None)` when absent or null; error when present with the wrong shape.
pub(crate) fn optional_object<'a>(
    obj: &'a Object,
    parent: &str,
    key: &str,
) -> Result<Option<&'a Object>, EventError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(inner)) => Ok(Some(inner)),
        Some(_) => Err(invalid(join(parent, key), "object")),
    }
}

pub(crate) fn required_array<'a>(
    obj: &'a Object,
    parent: &str,
    key: &str,
) -> Result<&'a Vec<Value>, EventError> {
    obj.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(join(parent, key), "array"))
}

/// Non-empty string. Platforms send some ids as numbers, which are accepted.
pub(crate) fn required_str(obj: &Object, parent: &str, key: &str) -> Result<String, EventError> {
    optional_str(obj, key).ok_or_else(|| invalid(join(parent, key), "non-empty string"))
}

pub(crate) fn optional_str(obj: &Object, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer sent either as a JSON number or a numeric string.
pub(crate) fn optional_i64(obj: &Object, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
