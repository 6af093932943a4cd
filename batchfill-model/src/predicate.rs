use crate::JoinKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Shape of a per-target condition value.
///
/// A JSON object is structured and contributes a whole branch to a
/// disjunction. Every other value, including arrays and null, is scalar and
/// contributes one entry to a membership list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Scalar,
    Structured,
}

impl ConditionKind {
    /// Classifies a condition value.
    pub fn of(value: &Value) -> Self {
        if value.is_object() {
            Self::Structured
        } else {
            Self::Scalar
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Structured => f.write_str("structured"),
        }
    }
}

/// The accumulated part of a bulk predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PredicateShape {
    /// `field` equals one of `values`.
    Membership { field: String, values: Vec<Value> },
    /// Any of the branches matches; a branch matches when every one of its
    /// fields equals the record's field.
    Disjunction { branches: Vec<Map<String, Value>> },
}

impl PredicateShape {
    /// The condition kind this shape accepts.
    pub fn kind(&self) -> ConditionKind {
        match self {
            Self::Membership { .. } => ConditionKind::Scalar,
            Self::Disjunction { .. } => ConditionKind::Structured,
        }
    }

    /// Number of accumulated entries.
    pub fn len(&self) -> usize {
        match self {
            Self::Membership { values, .. } => values.len(),
            Self::Disjunction { branches } => branches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches(&self, record: &Value) -> bool {
        match self {
            Self::Membership { field, values } => {
                let key = JoinKey::from_value(field_of(record, field));
                values.iter().any(|v| JoinKey::from_value(v) == key)
            }
            Self::Disjunction { branches } => {
                branches.iter().any(|branch| fields_equal(branch, record))
            }
        }
    }
}

/// A bulk query against one record source.
///
/// `base` is the seed condition every record must satisfy; `shape` holds the
/// per-target conditions merged so far. A predicate without a shape has no
/// targets behind it and selects nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub base: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<PredicateShape>,
}

impl Predicate {
    /// Creates a predicate seeded with a base condition.
    pub fn new(base: Map<String, Value>) -> Self {
        Self { base, shape: None }
    }

    /// Whether no per-target condition has been merged in.
    pub fn is_empty(&self) -> bool {
        self.shape.as_ref().is_none_or(PredicateShape::is_empty)
    }

    /// Number of per-target conditions merged in.
    pub fn len(&self) -> usize {
        self.shape.as_ref().map_or(0, PredicateShape::len)
    }

    /// Returns true if `record` satisfies the base condition and the
    /// accumulated shape.
    pub fn matches(&self, record: &Value) -> bool {
        match &self.shape {
            Some(shape) => fields_equal(&self.base, record) && shape.matches(record),
            None => false,
        }
    }
}

fn field_of<'a>(record: &'a Value, field: &str) -> &'a Value {
    record.get(field).unwrap_or(&Value::Null)
}

fn fields_equal(expected: &Map<String, Value>, record: &Value) -> bool {
    expected
        .iter()
        .all(|(field, value)| JoinKey::from_value(field_of(record, field)) == JoinKey::from_value(value))
}
