use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dynamic value carried in whiteboard payloads before normalization.
///
/// Whiteboard entries arrive as loosely-typed string/byte maps (the wire
/// shape of a stream entry); `Scalar` is the typed middle ground the
/// normalizer coerces into before projecting fields onto a `TypedEvent`
/// payload struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Scalar>),
    Map(BTreeMap<String, Scalar>),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Float(f) => Some(*f as i64),
            Scalar::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(n) => Some(*n as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::String(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Scalar::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Scalar]> {
        match self {
            Scalar::Array(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Scalar::String(s) => Some(s),
            Scalar::Int(n) => Some(n.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

impl From<serde_json::Value> for Scalar {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Scalar::Null,
            serde_json::Value::Bool(b) => Scalar::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Scalar::Int(i)
                } else {
                    Scalar::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Scalar::String(s),
            serde_json::Value::Array(items) => {
                Scalar::Array(items.into_iter().map(Scalar::from).collect())
            }
            serde_json::Value::Object(map) => Scalar::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Scalar::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Map of field name to dynamic value, the raw shape of a whiteboard entry
/// before normalization.
pub type ScalarMap = BTreeMap<String, Scalar>;
