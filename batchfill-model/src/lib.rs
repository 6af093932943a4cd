//! Core data model for batchfill.
//!
//! Defines the plain types the join engine and its record sources share:
//! - [`Target`]: a caller-owned JSON object the engine fills in place
//! - [`JoinKey`]: a scalar key with value equality, used to route records
//! - [`Predicate`] / [`PredicateShape`]: the accumulated bulk query for one source
//! - [`ConditionKind`]: whether a per-target condition is scalar or structured
//! - [`SubscriptionId`]: time-ordered identifier for a subscription
//!
//! Nothing here performs I/O. Record sources translate a [`Predicate`] into
//! their own query syntax; [`Predicate::matches`] is the reference semantics.

mod id;
mod key;
mod predicate;
mod target;

pub use id::SubscriptionId;
pub use key::JoinKey;
pub use predicate::{ConditionKind, Predicate, PredicateShape};
pub use target::Target;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building model values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("target must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

/// Human-readable name of a JSON value's type, for error messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
