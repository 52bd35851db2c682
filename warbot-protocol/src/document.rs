//! Loosely-typed JSON documents.
//!
//! The server schema is external and changes without notice, so payloads are
//! kept as ordered key/value maps. Missing keys and mismatched types read as
//! defaults instead of failing.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

static NULL: Value = Value::Null;

/// An ordered JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parses a document. Valid JSON that is not an object yields an empty one.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Self::from(value))
    }

    /// Parses a document, yielding an empty one if the bytes are not a JSON object.
    pub fn from_slice_lossy(bytes: &[u8]) -> Self {
        Self::from_slice(bytes).unwrap_or_else(|e| {
            tracing::debug!("Discarding unparsable document: {}", e);
            Self::new()
        })
    }

    /// Returns the value under `key`, or `Null` if it is absent.
    pub fn get(&self, key: &str) -> &Value {
        self.0.get(key).unwrap_or(&NULL)
    }

    /// Returns the nested object under `key`, or an empty document.
    pub fn object(&self, key: &str) -> Document {
        match self.0.get(key) {
            Some(Value::Object(map)) => Document(map.clone()),
            _ => Document::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Serializes the document as compact JSON.
    pub fn to_vec(&self) -> Vec<u8> {
        // Serializing a string-keyed map cannot fail.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Document(map),
            _ => Document::new(),
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

impl Deref for Document {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Defaulted typed access on JSON values.
///
/// Numbers encoded as strings (the server sends 64-bit ids that way) are
/// accepted by the numeric accessors.
pub trait ValueExt {
    fn int(&self) -> i64;
    fn float(&self) -> f64;
    fn flag(&self) -> bool;
    fn text(&self) -> &str;
    fn items(&self) -> &[Value];
}

impl ValueExt for Value {
    fn int(&self) -> i64 {
        match self {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            Value::Bool(b) => *b as i64,
            _ => 0,
        }
    }

    fn float(&self) -> f64 {
        match self {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn flag(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            _ => false,
        }
    }

    fn text(&self) -> &str {
        self.as_str().unwrap_or("")
    }

    fn items(&self) -> &[Value] {
        self.as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_keys_default() {
        let doc = Document::from(json!({"a": 1}));
        assert_eq!(doc.get("missing").int(), 0);
        assert_eq!(doc.get("missing")["nested"].text(), "");
        assert!(doc.get("missing").items().is_empty());
        assert!(!doc.get("missing").flag());
    }

    #[test]
    fn test_nested_access() {
        let doc = Document::from(json!({
            "allianceInfo": {"aid": "9007199254740993"},
            "resource": {"coin": 12.5},
            "list": [1, 2, 3],
        }));
        assert_eq!(doc.get("allianceInfo")["aid"].int(), 9007199254740993);
        assert_eq!(doc.get("resource")["coin"].float(), 12.5);
        assert_eq!(doc.get("list").items().len(), 3);
        assert_eq!(doc.object("resource").get("coin").float(), 12.5);
    }

    #[test]
    fn test_lossy_parse() {
        assert!(Document::from_slice_lossy(b"not json").is_empty());
        assert!(Document::from_slice_lossy(b"[1,2]").is_empty());
        let doc = Document::from_slice_lossy(br#"{"k":"v"}"#);
        assert_eq!(doc.get("k").text(), "v");
    }

    #[test]
    fn test_strict_parse() {
        assert!(matches!(
            Document::from_slice(b"{\"k\":"),
            Err(ProtocolError::Json(_))
        ));
        assert!(Document::from_slice(b"[1,2]").unwrap().is_empty());
        assert_eq!(Document::from_slice(br#"{"n":3}"#).unwrap().get("n").int(), 3);
    }

    #[test]
    fn test_key_order_preserved() {
        let doc = Document::from_slice_lossy(br#"{"z":1,"a":2,"m":3}"#);
        assert_eq!(doc.to_vec(), br#"{"z":1,"a":2,"m":3}"#.to_vec());
    }

    #[test]
    fn test_flag_from_number() {
        let doc = Document::from(json!({"on": 1, "off": 0, "b": true}));
        assert!(doc.get("on").flag());
        assert!(!doc.get("off").flag());
        assert!(doc.get("b").flag());
    }
}
