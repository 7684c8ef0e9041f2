//! Canonical JSON mínimo: claves ordenadas, sin espacios. Base del
//! fingerprint de niveles de un `Machine`.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut tree = BTreeMap::new();
            for (k, v) in map {
                tree.insert(k, to_canonical_json(v));
            }
            let items: Vec<String> = tree.into_iter()
                                         .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                                         .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// SHA-256 (hex) del canonical JSON de `value`.
pub fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}
