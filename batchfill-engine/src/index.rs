//! Key index: which target is waiting for which key.

use batchfill_model::{JoinKey, Target};
use std::collections::HashMap;

/// Maps a target-side key to the target awaiting data for it.
///
/// Registering a second target under the same key replaces the first; only
/// the last target added for a key is filled.
#[derive(Debug, Default)]
pub struct KeyIndex {
    targets: HashMap<JoinKey, Target>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `target` under `key`, returning the target it replaced.
    pub fn register(&mut self, key: JoinKey, target: Target) -> Option<Target> {
        self.targets.insert(key, target)
    }

    pub fn get(&self, key: &JoinKey) -> Option<&Target> {
        self.targets.get(key)
    }

    pub fn contains(&self, key: &JoinKey) -> bool {
        self.targets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
