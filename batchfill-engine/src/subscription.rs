//! Subscriptions: the handle callers add targets to.

use crate::condition::ConditionBuilder;
use crate::error::{JoinError, JoinResult};
use crate::handler::DataHandler;
use crate::index::KeyIndex;
use crate::options::{FetchMode, JoinPlan};
use crate::source::RecordSource;
use batchfill_model::{ConditionKind, JoinKey, Predicate, SubscriptionId, Target};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug)]
struct SubscriptionState {
    index: KeyIndex,
    conditions: ConditionBuilder,
    consumed: bool,
}

/// One join registration: a source, a resolved plan and the targets
/// waiting on it.
///
/// Adding targets is synchronous and does no I/O. The subscription is
/// fetched exactly once, by the first fill cycle that drains it; adds
/// after that point are rejected.
pub struct Subscription {
    id: SubscriptionId,
    source: Arc<dyn RecordSource>,
    plan: Arc<JoinPlan>,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(source: Arc<dyn RecordSource>, plan: JoinPlan) -> Self {
        let conditions =
            ConditionBuilder::new(plan.base_condition.clone(), plan.foreign_field.clone());
        Self {
            id: SubscriptionId::new(),
            source,
            plan: Arc::new(plan),
            state: Mutex::new(SubscriptionState {
                index: KeyIndex::new(),
                conditions,
                consumed: false,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SubscriptionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn plan(&self) -> &JoinPlan {
        &self.plan
    }

    /// Registers `target` and merges its condition into the predicate.
    ///
    /// A configured default value is seeded into the target immediately,
    /// after its key has been read. A rejected add changes nothing.
    pub fn add(&self, target: &Target) -> JoinResult<()> {
        let (key, condition) =
            target.with(|fields| ((self.plan.target_key)(fields), (self.plan.condition)(fields)));
        let key = JoinKey::from_value(&key);

        // Seeded under the state lock: a drain must never see the target
        // before its default.
        let mut state = self.lock_state();
        if state.consumed {
            return Err(JoinError::SubscriptionConsumed(self.id));
        }
        state.conditions.push(condition)?;
        if state.index.register(key.clone(), target.clone()).is_some() {
            debug!("Subscription {}: key {} re-registered, last target wins", self.id, key);
        }

        match &self.plan.default_value {
            Some(Value::Object(defaults)) => target.merge(defaults),
            Some(value) => {
                target.set(self.plan.target_field.as_str(), value.clone());
            }
            None => {}
        }
        Ok(())
    }

    /// Adds every target, stopping at the first rejected one.
    pub fn add_all<'a>(&self, targets: impl IntoIterator<Item = &'a Target>) -> JoinResult<()> {
        targets.into_iter().try_for_each(|target| self.add(target))
    }

    /// Number of distinct keys waiting for data.
    pub fn len(&self) -> usize {
        self.lock_state().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Condition kind fixed by the first add.
    pub fn condition_kind(&self) -> Option<ConditionKind> {
        self.lock_state().conditions.kind()
    }

    /// The bulk predicate accumulated so far.
    pub fn predicate(&self) -> Predicate {
        self.lock_state().conditions.predicate()
    }

    /// Whether a fill cycle has drained this subscription.
    pub fn is_consumed(&self) -> bool {
        self.lock_state().consumed
    }

    /// Marks the subscription consumed and moves its targets into a fetch.
    /// Returns `None` if another cycle already took it.
    pub(crate) fn take_fetch(&self) -> Option<PendingFetch> {
        let mut state = self.lock_state();
        if state.consumed {
            return None;
        }
        state.consumed = true;
        let index = std::mem::take(&mut state.index);
        Some(PendingFetch {
            subscription: self.id,
            source: Arc::clone(&self.source),
            predicate: state.conditions.predicate(),
            mode: self.plan.fetch_mode,
            target_field: self.plan.target_field.clone(),
            handler: DataHandler::new(index, Arc::clone(&self.plan)),
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("source", &self.source.name())
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

/// A drained subscription, ready to fetch.
pub(crate) struct PendingFetch {
    pub(crate) subscription: SubscriptionId,
    pub(crate) source: Arc<dyn RecordSource>,
    pub(crate) predicate: Predicate,
    pub(crate) mode: FetchMode,
    pub(crate) target_field: String,
    pub(crate) handler: DataHandler,
}
