//! Helpers for working with JSON records by dotted key path

use serde_json::{Map, Value};

/// Values that count as "no data": null, false, zero and the empty string
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

pub fn get_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

/// Set a value at a dotted key path, creating intermediate objects.
/// A non-object met along the way is replaced by an object.
pub fn set_path(record: &mut Value, path: &str, value: Value) {
    let mut current = record;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };

        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }

        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

pub fn remove_key(record: &mut Value, key: &str) -> Option<Value> {
    record.as_object_mut().and_then(|map| map.remove(key))
}

/// Shallow merge of `source` into `target`, source wins
pub fn extend(target: &mut Value, source: Value) {
    if let (Value::Object(target), Value::Object(source)) = (target, source) {
        for (key, value) in source {
            target.insert(key, value);
        }
    }
}
