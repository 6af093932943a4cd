//! Join keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A key extracted from a target or a fetched record.
///
/// Two keys are equal when the JSON values they came from are equal.
/// Numbers compare by their canonical text, so `1` matches `1` but not
/// `1.0`. Arrays and objects collapse into `Compound` using their
/// serialized form with object keys sorted at every level, so field order
/// never affects equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum JoinKey {
    Null,
    Bool(bool),
    Number(String),
    String(String),
    Compound(String),
}

impl JoinKey {
    /// Builds the key for a JSON value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.to_string()),
            Value::String(s) => Self::String(s.clone()),
            compound => Self::Compound(canonical(compound).to_string()),
        }
    }

    /// Whether the key came from a missing or null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Rebuilds objects with their keys inserted in sorted order, which is the
/// order they serialize in with or without serde_json's `preserve_order`.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut entries: Vec<_> = fields.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

impl From<&Value> for JoinKey {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&str> for JoinKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for JoinKey {
    fn from(n: i64) -> Self {
        Self::Number(n.to_string())
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(n),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Compound(json) => f.write_str(json),
        }
    }
}
