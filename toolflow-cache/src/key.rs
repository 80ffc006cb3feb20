//! Deterministic cache key derivation.

use std::fmt::{self, Display, Formatter, Write as _};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Key identifying a memoized tool result.
///
/// Derived from the tool name, an optional contract version, and the
/// canonical form of the full parameter set, so distinct parameterizations
/// never collide and object key order never matters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key for `tool_name` invoked with `parameters`.
    ///
    /// Supplying a `version` scopes the key to one contract revision so a tool
    /// upgrade never serves results produced by the previous behaviour.
    #[must_use]
    pub fn derive(tool_name: &str, version: Option<&str>, parameters: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update([0]);
        if let Some(version) = version {
            hasher.update(version.as_bytes());
        }
        hasher.update([0]);
        hasher.update(canonical_json(parameters).as_bytes());

        let digest = hasher.finalize();
        let mut hex = String::with_capacity(tool_name.len() + 1 + digest.len() * 2);
        hex.push_str(tool_name);
        hex.push(':');
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// Wraps a pre-computed key string.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders `value` as JSON with object keys sorted at every depth.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_object_key_order() {
        let a = json!({ "path": "src", "depth": 2, "opts": { "x": 1, "y": [1, 2] } });
        let b = json!({ "opts": { "y": [1, 2], "x": 1 }, "depth": 2, "path": "src" });
        assert_eq!(
            CacheKey::derive("list_files", None, &a),
            CacheKey::derive("list_files", None, &b)
        );
    }

    #[test]
    fn key_distinguishes_parameters_tools_and_versions() {
        let params = json!({ "path": "src" });
        let base = CacheKey::derive("list_files", Some("1.0.0"), &params);

        assert_ne!(
            base,
            CacheKey::derive("list_files", Some("1.0.0"), &json!({ "path": "tests" }))
        );
        assert_ne!(base, CacheKey::derive("read_file", Some("1.0.0"), &params));
        assert_ne!(base, CacheKey::derive("list_files", Some("1.1.0"), &params));
        assert_ne!(
            CacheKey::derive("t", None, &json!([1, 2])),
            CacheKey::derive("t", None, &json!([2, 1]))
        );
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({ "b": { "d": 1, "c": 2 }, "a": null });
        assert_eq!(canonical_json(&value), r#"{"a":null,"b":{"c":2,"d":1}}"#);
    }
}
