//! Raw alert records as delivered by the server, before they are interpreted
//! into a concrete alert kind. Notifications carry a very wide range of
//! fields, so everything beyond the type tag stays untyped until the kind is
//! known.

use crate::model::{NodeHandle, NodeKind};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// One undecoded alert record: a type discriminator plus a field map.
/// Produced by the catch-up response and by the action-packet layer.
#[derive(Debug, Clone, Default)]
pub struct RawAlert {
    pub tag: String,
    fields: BTreeMap<String, Value>,
}

impl RawAlert {
    pub fn new(tag: impl Into<String>) -> Self {
        RawAlert {
            tag: tag.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Build from a decoded JSON object; the `t` member is the discriminator,
    /// everything else lands in the field map. Returns `None` when the value
    /// is not an object or has no usable tag.
    pub fn from_value(v: Value) -> Option<RawAlert> {
        let Value::Object(map) = v else {
            warn!("raw alert is not a JSON object, dropping");
            return None;
        };
        let mut fields = BTreeMap::new();
        let mut tag = None;
        for (k, v) in map {
            if k == "t" {
                match v {
                    Value::String(s) => tag = Some(s),
                    other => {
                        warn!(?other, "raw alert type tag is not a string, dropping");
                        return None;
                    }
                }
            } else {
                fields.insert(k, v);
            }
        }
        Some(RawAlert {
            tag: tag?,
            fields,
        })
    }

    pub fn set(&mut self, name: &str, value: Value) -> &mut Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn number(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        self.number(name).unwrap_or(default)
    }

    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.number(name).unwrap_or(default)
    }

    /// Handles arrive either as JSON numbers or as decimal strings.
    pub fn get_handle(&self, name: &str) -> Option<NodeHandle> {
        match self.fields.get(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str, default: &str) -> String {
        match self.fields.get(name) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// Array of `{h, t}` objects: node handle plus node type.
    /// Entries with an unknown type or a missing handle are skipped.
    pub fn get_handle_kind_array(&self, name: &str) -> Option<Vec<(NodeHandle, NodeKind)>> {
        let Value::Array(items) = self.fields.get(name)? else {
            return None;
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(obj) = item else { continue };
            let handle = match obj.get("h") {
                Some(Value::Number(n)) => n.as_u64(),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            };
            let kind = obj
                .get("t")
                .and_then(Value::as_i64)
                .and_then(NodeKind::from_wire);
            if let (Some(h), Some(k)) = (handle, kind) {
                out.push((h, k));
            }
        }
        Some(out)
    }

    pub fn get_string_array(&self, name: &str) -> Option<Vec<String>> {
        let Value::Array(items) = self.fields.get(name)? else {
            return None;
        };
        Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_extracts_tag_and_fields() {
        let raw = RawAlert::from_value(json!({
            "t": "share",
            "u": 42,
            "m": "alice@example.com",
            "n": "9001",
        }))
        .unwrap();
        assert_eq!(raw.tag, "share");
        assert_eq!(raw.get_handle("u"), Some(42));
        assert_eq!(raw.get_handle("n"), Some(9001));
        assert_eq!(raw.get_string("m", ""), "alice@example.com");
        assert_eq!(raw.get_string("missing", "x"), "x");
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(RawAlert::from_value(json!([1, 2, 3])).is_none());
        assert!(RawAlert::from_value(json!({"u": 1})).is_none());
    }

    #[test]
    fn handle_kind_array_skips_bad_entries() {
        let raw = RawAlert::from_value(json!({
            "t": "put",
            "f": [
                {"h": 1, "t": 0},
                {"h": 2, "t": 1},
                {"h": 3, "t": 9},
                {"t": 0},
            ],
        }))
        .unwrap();
        let pairs = raw.get_handle_kind_array("f").unwrap();
        assert_eq!(
            pairs,
            vec![(1, NodeKind::File), (2, NodeKind::Folder)]
        );
    }

    #[test]
    fn numbers_accept_strings() {
        let mut raw = RawAlert::new("psts");
        raw.set("p", json!("11")).set("r", json!(1));
        assert_eq!(raw.get_int("p", 0), 11);
        assert_eq!(raw.get_int("r", 0), 1);
        assert_eq!(raw.get_int("absent", -1), -1);
    }
}
