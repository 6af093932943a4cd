//! Incremental construction of one bulk predicate per subscription.

use crate::error::{JoinError, JoinResult};
use batchfill_model::{ConditionKind, Predicate, PredicateShape};
use serde_json::{Map, Value};

/// Merges per-target conditions into a single [`Predicate`].
///
/// The first condition fixes the shape: a structured condition starts a
/// disjunction, a scalar one starts a membership list over the foreign
/// field. Later conditions must have the same kind; a mismatch is rejected
/// and leaves the builder unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConditionBuilder {
    base: Map<String, Value>,
    membership_field: Option<String>,
    shape: Option<PredicateShape>,
}

impl ConditionBuilder {
    pub fn new(base: Map<String, Value>, membership_field: Option<String>) -> Self {
        Self {
            base,
            membership_field,
            shape: None,
        }
    }

    /// The kind fixed by the first condition, if any.
    pub fn kind(&self) -> Option<ConditionKind> {
        self.shape.as_ref().map(PredicateShape::kind)
    }

    pub fn len(&self) -> usize {
        self.shape.as_ref().map_or(0, PredicateShape::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that `condition` can be appended without appending it.
    pub fn check(&self, condition: &Value) -> JoinResult<ConditionKind> {
        let found = ConditionKind::of(condition);
        match self.kind() {
            Some(expected) if expected != found => {
                Err(JoinError::ConditionShapeMismatch { expected, found })
            }
            Some(_) => Ok(found),
            None if found == ConditionKind::Scalar && self.membership_field.is_none() => {
                Err(JoinError::MissingForeignField)
            }
            None => Ok(found),
        }
    }

    /// Appends one target's condition.
    pub fn push(&mut self, condition: Value) -> JoinResult<()> {
        self.check(&condition)?;
        let shape = match (self.shape.take(), condition) {
            (None, Value::Object(branch)) => PredicateShape::Disjunction {
                branches: vec![branch],
            },
            (None, scalar) => PredicateShape::Membership {
                field: self
                    .membership_field
                    .clone()
                    .ok_or(JoinError::MissingForeignField)?,
                values: vec![scalar],
            },
            (Some(PredicateShape::Disjunction { mut branches }), Value::Object(branch)) => {
                branches.push(branch);
                PredicateShape::Disjunction { branches }
            }
            (Some(PredicateShape::Membership { field, mut values }), scalar)
                if ConditionKind::of(&scalar) == ConditionKind::Scalar =>
            {
                values.push(scalar);
                PredicateShape::Membership { field, values }
            }
            (Some(shape), other) => {
                let expected = shape.kind();
                self.shape = Some(shape);
                return Err(JoinError::ConditionShapeMismatch {
                    expected,
                    found: ConditionKind::of(&other),
                });
            }
        };
        self.shape = Some(shape);
        Ok(())
    }

    /// The predicate accumulated so far.
    pub fn predicate(&self) -> Predicate {
        Predicate {
            base: self.base.clone(),
            shape: self.shape.clone(),
        }
    }
}
