//! Pluggable key, condition and assignment strategies.
//!
//! A [`JoinStrategy`] has four capability slots. The three key/condition
//! slots are optional because option resolution can fill them from field
//! names; `assign` is optional because the default assignment (copy a
//! field, or append it for one-to-many joins) covers most joins.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Reads a value off a target's fields.
pub type TargetFn = Arc<dyn Fn(&Map<String, Value>) -> Value + Send + Sync>;

/// Reads a value off a fetched record.
pub type RecordFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Writes a fetched record into a target, replacing the default assignment.
pub type AssignFn = Arc<dyn Fn(&mut Map<String, Value>, &Value) + Send + Sync>;

/// Custom strategies for one subscription.
#[derive(Clone, Default)]
pub struct JoinStrategy {
    pub(crate) target_key: Option<TargetFn>,
    pub(crate) condition: Option<TargetFn>,
    pub(crate) foreign_key: Option<RecordFn>,
    pub(crate) assign: Option<AssignFn>,
}

impl JoinStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which a target waits for its data.
    pub fn with_target_key(
        mut self,
        f: impl Fn(&Map<String, Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.target_key = Some(Arc::new(f));
        self
    }

    /// Per-target condition merged into the bulk predicate.
    ///
    /// Every target of one subscription must produce the same
    /// [`ConditionKind`](batchfill_model::ConditionKind); the first add fixes it.
    pub fn with_condition(
        mut self,
        f: impl Fn(&Map<String, Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.condition = Some(Arc::new(f));
        self
    }

    /// Key a fetched record is routed by. Must agree with the target key.
    pub fn with_foreign_key(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.foreign_key = Some(Arc::new(f));
        self
    }

    /// Replaces the default assignment entirely.
    pub fn with_assign(
        mut self,
        f: impl Fn(&mut Map<String, Value>, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.assign = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinStrategy")
            .field("target_key", &self.target_key.is_some())
            .field("condition", &self.condition.is_some())
            .field("foreign_key", &self.foreign_key.is_some())
            .field("assign", &self.assign.is_some())
            .finish()
    }
}

/// Strategy reading a top-level target field; missing fields read as null.
pub(crate) fn read_target_field(field: String) -> TargetFn {
    Arc::new(move |fields| fields.get(&field).cloned().unwrap_or(Value::Null))
}

/// Strategy reading a top-level record field; missing fields read as null.
pub(crate) fn read_record_field(field: String) -> RecordFn {
    Arc::new(move |record| record.get(&field).cloned().unwrap_or(Value::Null))
}
