use serde_json::Value;

/// True for anything that is not an array or object
pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Structural copy used whenever a write integrates a nested value
///
/// Absent and `null` inputs both come back as `Value::Null`, which callers
/// read as "no usable snapshot, start from an empty container". Arrays made
/// only of primitives take the shallow path.
pub fn snapshot(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(Value::Array(items)) => {
            if items.iter().all(is_primitive) {
                Value::Array(items.to_vec())
            } else {
                Value::Array(items.iter().map(|item| snapshot(Some(item))).collect())
            }
        }
        Some(other) => other.clone(),
    }
}
