//! Key sanitizing applied before anything reaches the store.
//!
//! Ledger payloads are free-form JSON. Keys may contain `.` or start with `$`,
//! which document-style field paths reserve, and both keys and strings may
//! carry NUL bytes, which PostgreSQL rejects in text and JSONB.

use serde_json::{Map, Value};

const REPLACEMENT: char = '#';

/// Sanitize a single key.
pub fn sanitize_key(key: &str) -> String {
    let mut out: String = key
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| if c == '.' { REPLACEMENT } else { c })
        .collect();
    if out.starts_with('$') {
        out.replace_range(..1, &REPLACEMENT.to_string());
    }
    out
}

/// Remove NUL bytes from a string value.
pub fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

/// Recursively sanitize a JSON value, preserving its structure.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_map(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::String(s) if s.contains('\0') => Value::String(sanitize_string(&s)),
        other => other,
    }
}

/// Recursively sanitize an object's keys and values.
pub fn sanitize_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(k, v)| (sanitize_key(&k), sanitize_value(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_dots_recursively() {
        let input = json!({
            "foo.bar": "baz",
            "nested": {"a.b": {"c.d": 1}},
            "list": [{"x.y": true}, "plain"]
        });
        let out = sanitize_value(input);
        assert_eq!(
            out,
            json!({
                "foo#bar": "baz",
                "nested": {"a#b": {"c#d": 1}},
                "list": [{"x#y": true}, "plain"]
            })
        );
    }

    #[test]
    fn strips_nul_and_leading_dollar() {
        assert_eq!(sanitize_key("$set"), "#set");
        assert_eq!(sanitize_key("a\0b"), "ab");
        assert_eq!(sanitize_value(json!("x\0y")), json!("xy"));
    }

    #[test]
    fn clean_input_is_unchanged() {
        let input = json!({"from": "alice", "amount": "1.000 STEEM", "n": [1, 2, 3]});
        assert_eq!(sanitize_value(input.clone()), input);
    }
}
