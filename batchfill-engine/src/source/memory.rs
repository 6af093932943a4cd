//! In-memory record source.
//!
//! Holds records in insertion order and filters them with
//! [`Predicate::matches`]. Every predicate it is queried with is recorded,
//! and failures can be injected, which makes it the source of choice for
//! tests and for running scenarios without a database.

use super::{RecordSource, RecordStream};
use crate::error::{JoinError, JoinResult};
use async_trait::async_trait;
use batchfill_model::Predicate;
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct Faults {
    on_open: Option<String>,
    after: Option<(usize, String)>,
}

/// A record source backed by a `Vec`.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    records: Mutex<Vec<Value>>,
    queries: Mutex<Vec<Predicate>>,
    faults: Mutex<Faults>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Creates a source holding `records`.
    pub fn with_records(name: impl Into<String>, records: impl IntoIterator<Item = Value>) -> Self {
        let source = Self::new(name);
        lock(&source.records).extend(records);
        source
    }

    /// Appends a record.
    pub fn insert(&self, record: Value) {
        lock(&self.records).push(record);
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every predicate this source was queried with, oldest first.
    pub fn queries(&self) -> Vec<Predicate> {
        lock(&self.queries).clone()
    }

    pub fn query_count(&self) -> usize {
        lock(&self.queries).len()
    }

    /// Makes the next `get_stream` calls fail before any record is sent.
    pub fn fail_on_open(&self, message: impl Into<String>) {
        lock(&self.faults).on_open = Some(message.into());
    }

    /// Makes streams fail after delivering `count` matching records.
    pub fn fail_after(&self, count: usize, message: impl Into<String>) {
        lock(&self.faults).after = Some((count, message.into()));
    }

    /// Removes injected failures.
    pub fn clear_faults(&self) {
        *lock(&self.faults) = Faults::default();
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_stream(&self, predicate: &Predicate) -> JoinResult<RecordStream> {
        lock(&self.queries).push(predicate.clone());

        let faults = lock(&self.faults);
        if let Some(message) = &faults.on_open {
            return Err(JoinError::source_failure(&self.name, message.clone()));
        }

        let mut items: Vec<JoinResult<Value>> = lock(&self.records)
            .iter()
            .filter(|record| predicate.matches(record))
            .cloned()
            .map(Ok)
            .collect();
        if let Some((count, message)) = &faults.after {
            items.truncate(*count);
            items.push(Err(JoinError::source_failure(&self.name, message.clone())));
        }
        drop(faults);

        debug!("Source {} streaming {} item(s)", self.name, items.len());
        Ok(futures::stream::iter(items).boxed())
    }
}
