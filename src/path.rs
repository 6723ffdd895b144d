//! Dot-separated path addressing
//!
//! A key is `namespace[.segment]*`. Each segment is an object key, or a
//! decimal index when the value it is applied to is an array. Nothing in
//! here panics or errors: a path that cannot be resolved resolves to `None`.

use serde_json::{Map, Value};

/// Furthest an array write may land past the current end. The gap is padded
/// with `null`, so a larger one is refused and the write leaves the root as is.
pub const MAX_ARRAY_GAP: usize = 1024;

/// Join a namespace and a (possibly empty) path into a full key
pub fn join(namespace: &str, path: &str) -> String {
    if path.is_empty() {
        return namespace.to_string();
    }
    format!("{}.{}", namespace, path)
}

/// Split a full key into its root namespace and the remaining sub-path
///
/// `"ns.a.b"` becomes `("ns", "a.b")`, `"ns"` becomes `("ns", "")`.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once('.').unwrap_or((key, ""))
}

/// The two-segment key (`namespace.first`) whose listeners observe every
/// write below the first level.
pub fn root_listener_key(key: &str) -> &str {
    match key.match_indices('.').nth(1) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Read the value addressed by `path` inside `root`
pub fn get_nested_value<'a>(root: Option<&'a Value>, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return root;
    }

    let mut current = root?;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(parse_index(segment)?)?,
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }

    Some(current)
}

fn empty_container(next_segment: &str) -> Value {
    if parse_index(next_segment).is_some() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

/// Make `index` addressable, padding with `null`. False when the gap is too wide.
fn grow_to(items: &mut Vec<Value>, index: usize) -> bool {
    if index < items.len() {
        return true;
    }
    if index - items.len() > MAX_ARRAY_GAP {
        return false;
    }
    items.resize(index + 1, Value::Null);
    true
}

/// Return a new root with `path` set to `value`
///
/// `root` is never touched. Missing intermediates are created, an array when
/// the following segment is an index and an object otherwise. A `None` value
/// deletes the addressed entry: arrays shift later elements down, objects
/// drop the key. An empty path replaces the whole root.
pub fn set_nested_value(root: Option<&Value>, path: &str, value: Option<Value>) -> Option<Value> {
    if path.is_empty() {
        return value;
    }

    let segments: Vec<&str> = path.split('.').collect();
    let deleting = value.is_none();

    let mut result = match crate::value::snapshot(root) {
        _ if root.is_none() && deleting => return None,
        Value::Null if deleting => return Some(Value::Null),
        Value::Null => empty_container(segments[0]),
        v if !is_container(&v) && deleting => return Some(v),
        v if !is_container(&v) => empty_container(segments[0]),
        v => v,
    };

    if apply(&mut result, &segments, value) {
        Some(result)
    } else {
        // Unreachable write; hand back the untouched copy
        root.map(|r| crate::value::snapshot(Some(r)))
    }
}

/// Walk `segments` below `current`, writing at the last one. Returns false
/// when the path cannot be applied (e.g. a named segment into an array).
fn apply(current: &mut Value, segments: &[&str], value: Option<Value>) -> bool {
    let (segment, rest) = match segments.split_first() {
        Some(split) => split,
        None => return false,
    };

    if rest.is_empty() {
        return write_leaf(current, segment, value);
    }

    let next = rest[0];
    let child = match current {
        Value::Array(items) => {
            let Some(index) = parse_index(segment) else {
                return false;
            };
            if index >= items.len() && value.is_none() {
                return true;
            }
            if !grow_to(items, index) {
                return false;
            }
            &mut items[index]
        }
        Value::Object(map) => {
            if value.is_none() && !map.contains_key(*segment) {
                return true;
            }
            map.entry(segment.to_string()).or_insert(Value::Null)
        }
        _ => return false,
    };

    if !is_container(child) {
        if value.is_none() {
            return true;
        }
        *child = empty_container(next);
    }

    apply(child, rest, value)
}

fn write_leaf(current: &mut Value, segment: &str, value: Option<Value>) -> bool {
    match current {
        Value::Array(items) => {
            let Some(index) = parse_index(segment) else {
                return false;
            };
            match value {
                None => {
                    if index < items.len() {
                        items.remove(index);
                    }
                }
                Some(v) => {
                    if !grow_to(items, index) {
                        return false;
                    }
                    items[index] = v;
                }
            }
            true
        }
        Value::Object(map) => {
            match value {
                None => {
                    map.remove(segment);
                }
                Some(v) => {
                    map.insert(segment.to_string(), v);
                }
            }
            true
        }
        _ => false,
    }
}
