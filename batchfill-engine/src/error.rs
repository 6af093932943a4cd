//! Error types for the join engine.

use batchfill_model::{ConditionKind, SubscriptionId};
use thiserror::Error;

/// Result type for engine operations.
pub type JoinResult<T> = Result<T, JoinError>;

/// Errors that can occur while building subscriptions or filling them.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Missing or invalid join option.
    #[error("configuration error: {0}")]
    Config(String),

    /// A target could not be built from the given value.
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] batchfill_model::Error),

    /// A target's condition does not fit the predicate shape fixed by the
    /// subscription's first add.
    #[error("condition shape mismatch: subscription expects {expected} conditions, got {found}")]
    ConditionShapeMismatch {
        expected: ConditionKind,
        found: ConditionKind,
    },

    /// A scalar condition needs a foreign field to build a membership list.
    #[error("scalar condition requires a foreign_field for the membership predicate")]
    MissingForeignField,

    /// The subscription was already taken by a fill cycle.
    #[error("subscription {0} was already consumed by a fill cycle")]
    SubscriptionConsumed(SubscriptionId),

    /// The record source failed to open or deliver its stream.
    #[error("source {source_name} failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JoinError {
    /// Builds a [`JoinError::Source`].
    pub fn source_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}
