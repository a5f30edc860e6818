//! Tool signatures: `name + canonical JSON(input)`.
//!
//! Legacy permission requests arrive with only a tool name and its input, so
//! the signature is the only way to find the tool use that triggered them.

use std::collections::BTreeMap;

use serde_json::Value;

/// Signature key for a tool invocation
pub fn tool_signature(tool_name: &str, input: &Value) -> String {
    format!("{tool_name}:{}", canonical_json(input))
}

/// Serialize with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let sorted = sort_keys(value);
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in ordered {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"file_path": "/a.rs", "old": "x", "new": {"b": 1, "a": 2}});
        let b = json!({"new": {"a": 2, "b": 1}, "old": "x", "file_path": "/a.rs"});
        assert_eq!(tool_signature("Edit", &a), tool_signature("Edit", &b));
    }

    #[test]
    fn array_order_matters() {
        let a = json!({"paths": ["a", "b"]});
        let b = json!({"paths": ["b", "a"]});
        assert_ne!(tool_signature("Read", &a), tool_signature("Read", &b));
    }

    #[test]
    fn name_is_part_of_signature() {
        let input = json!({"command": "ls"});
        assert_ne!(tool_signature("Bash", &input), tool_signature("Shell", &input));
        assert_eq!(tool_signature("Bash", &input), r#"Bash:{"command":"ls"}"#);
    }
}
