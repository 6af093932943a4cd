//! Routes fetched records to the targets waiting for them.

use crate::index::KeyIndex;
use crate::options::JoinPlan;
use batchfill_model::JoinKey;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Applies fetched records to the targets in a [`KeyIndex`].
#[derive(Debug)]
pub struct DataHandler {
    index: KeyIndex,
    plan: Arc<JoinPlan>,
}

impl DataHandler {
    pub fn new(index: KeyIndex, plan: Arc<JoinPlan>) -> Self {
        Self { index, plan }
    }

    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    /// Applies one record. Returns false when no target waits for the
    /// record's key; batched predicates may over-fetch, so that is not an
    /// error.
    pub fn handle(&self, record: &Value) -> bool {
        let key = JoinKey::from_value(&(self.plan.foreign_key)(record));
        let Some(target) = self.index.get(&key) else {
            trace!("No target for key {}, dropping record", key);
            return false;
        };

        if let Some(assign) = &self.plan.assign {
            target.with_mut(|fields| assign(fields, record));
            return true;
        }

        let value = match &self.plan.source_field {
            Some(field) => record.get(field).cloned().unwrap_or(Value::Null),
            None => record.clone(),
        };
        if self.plan.is_multiple {
            target.push(&self.plan.target_field, value);
        } else {
            target.set(self.plan.target_field.as_str(), value);
        }
        true
    }
}
