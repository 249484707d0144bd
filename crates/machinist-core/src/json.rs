use serde_json::{Map, Value};

/// Look up a dotted field path (`"result.value"`) inside a JSON value.
///
/// Array elements can be addressed by index (`"items.0"`). An empty path
/// returns the value itself.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Shallow-merge `overlay` into `base`. Keys in `overlay` win.
///
/// When either side is not an object the base is wrapped as
/// `{"input": base, "previous": overlay}` so no information is lost.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (k, v) in o {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (Value::Null, other) => other.clone(),
        _ => {
            let mut map = Map::new();
            map.insert("input".to_string(), base.clone());
            map.insert("previous".to_string(), overlay.clone());
            Value::Object(map)
        }
    }
}

/// Insert `key: value` into an object input, wrapping non-object inputs as
/// `{"input": original}` first.
pub fn with_field(input: &Value, key: &str, value: Value) -> Value {
    let mut map = match input {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Extract a float from a JSON number, or from a numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
