//! Fill engine: the registry of pending subscriptions and the fill cycle.
//!
//! A fill cycle has two steps. The drain step runs under the engine's fill
//! lock: it takes every registered subscription out of the registry and
//! marks each one consumed. The lock is released before any fetch starts,
//! so subscriptions registered while fetches are in flight go to the next
//! cycle. The fetch step then streams one bulk query per drained
//! subscription, all concurrently.

use crate::error::{JoinError, JoinResult};
use crate::options::{EngineConfig, FetchMode, JoinOptions, JoinPlan};
use crate::source::RecordSource;
use crate::strategy::JoinStrategy;
use crate::subscription::{PendingFetch, Subscription};
use batchfill_model::SubscriptionId;
use futures::{StreamExt, TryStreamExt, future};
use serde::{Deserialize, Serialize};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Outcome of one subscription's fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSummary {
    pub subscription: SubscriptionId,
    pub source: String,
    pub target_field: String,
    /// Records delivered by the source.
    pub received: usize,
    /// Records that matched a waiting target.
    pub applied: usize,
}

/// Outcome of a fill cycle, one entry per drained subscription in
/// registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillSummary {
    pub fetches: Vec<FetchSummary>,
}

impl FillSummary {
    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }

    pub fn received(&self) -> usize {
        self.fetches.iter().map(|f| f.received).sum()
    }

    pub fn applied(&self) -> usize {
        self.fetches.iter().map(|f| f.applied).sum()
    }
}

/// The fill engine. Owns the registry and serializes drain steps.
pub struct FillEngine {
    /// Configuration.
    config: EngineConfig,
    /// Subscriptions created since the last drain, in creation order.
    registry: Mutex<Vec<Arc<Subscription>>>,
    /// True while a drain step holds the fill lock.
    filling: AtomicBool,
    /// Signalled once per released drain step.
    released: Notify,
}

/// Releases the fill lock on drop.
struct DrainGuard<'a> {
    engine: &'a FillEngine,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.engine.filling.store(false, Ordering::Release);
        self.engine.released.notify_one();
    }
}

impl FillEngine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with a custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Vec::new()),
            filling: AtomicBool::new(false),
            released: Notify::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_registry(&self) -> MutexGuard<'_, Vec<Arc<Subscription>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of subscriptions waiting for the next fill cycle.
    pub fn pending(&self) -> usize {
        self.lock_registry().len()
    }

    /// Resolves `options` against the engine defaults and registers a new
    /// subscription on `source`. Configuration errors are returned here,
    /// before any target is added.
    pub fn make_subscription(
        &self,
        source: Arc<dyn RecordSource>,
        options: JoinOptions,
        strategy: JoinStrategy,
    ) -> JoinResult<Arc<Subscription>> {
        let plan = JoinPlan::resolve(options, strategy, &self.config)?;
        let subscription = Arc::new(Subscription::new(source, plan));
        debug!(
            "Registered subscription {} on {} -> {}",
            subscription.id(),
            subscription.source_name(),
            subscription.plan().target_field()
        );
        self.lock_registry().push(Arc::clone(&subscription));
        Ok(subscription)
    }

    /// Shorthand for [`make_subscription`](Self::make_subscription) with
    /// field-based strategies only.
    pub fn subscribe(
        &self,
        source: Arc<dyn RecordSource>,
        options: JoinOptions,
    ) -> JoinResult<Arc<Subscription>> {
        self.make_subscription(source, options, JoinStrategy::default())
    }

    /// Runs one fill cycle over everything registered so far.
    ///
    /// Waits if another cycle is draining. Every drained fetch runs to
    /// completion; if any failed, the first failure in registration order
    /// is returned and assignments made by the others stay in place.
    pub async fn fill_subscriptions(&self) -> JoinResult<FillSummary> {
        let fetches = {
            let _guard = self.lock_fill().await;
            self.drain()
        };

        if fetches.is_empty() {
            debug!("Fill requested with no pending subscriptions");
            return Ok(FillSummary::default());
        }

        info!("Filling {} subscription(s)", fetches.len());
        let results = future::join_all(fetches.into_iter().map(PendingFetch::run)).await;

        let mut summary = FillSummary::default();
        let mut first_error: Option<JoinError> = None;
        for result in results {
            match result {
                Ok(fetch) => summary.fetches.push(fetch),
                Err(e) => {
                    warn!("Fetch failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(
                    "Fill complete: {} received, {} applied",
                    summary.received(),
                    summary.applied()
                );
                Ok(summary)
            }
        }
    }

    /// Acquires the fill lock, waiting on the release signal while another
    /// drain step holds it.
    async fn lock_fill(&self) -> DrainGuard<'_> {
        loop {
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();
            if self
                .filling
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return DrainGuard { engine: self };
            }
            debug!("Fill in progress, waiting for drain release");
            released.await;
        }
    }

    /// Empties the registry and turns each subscription into a fetch.
    fn drain(&self) -> Vec<PendingFetch> {
        let drained = std::mem::take(&mut *self.lock_registry());
        drained.iter().filter_map(|s| s.take_fetch()).collect()
    }
}

impl Default for FillEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingFetch {
    async fn run(self) -> JoinResult<FetchSummary> {
        let mut summary = FetchSummary {
            subscription: self.subscription,
            source: self.source.name().to_string(),
            target_field: self.target_field,
            received: 0,
            applied: 0,
        };

        if self.predicate.is_empty() {
            debug!("Subscription {} has no targets, skipping fetch", self.subscription);
            return Ok(summary);
        }

        let stream = self.source.get_stream(&self.predicate).await?;
        let handler = &self.handler;
        match self.mode {
            FetchMode::Sequential => {
                let mut stream = stream;
                while let Some(record) = stream.next().await {
                    let record = record?;
                    summary.received += 1;
                    if handler.handle(&record) {
                        summary.applied += 1;
                    }
                }
            }
            FetchMode::Concurrent(limit) => {
                let received = AtomicUsize::new(0);
                let applied = AtomicUsize::new(0);
                let result = stream
                    .try_for_each_concurrent(limit, |record| {
                        received.fetch_add(1, Ordering::Relaxed);
                        if handler.handle(&record) {
                            applied.fetch_add(1, Ordering::Relaxed);
                        }
                        future::ready(Ok(()))
                    })
                    .await;
                summary.received = received.into_inner();
                summary.applied = applied.into_inner();
                result?;
            }
        }

        debug!(
            "Subscription {} on {}: {} received, {} applied",
            summary.subscription, summary.source, summary.received, summary.applied
        );
        Ok(summary)
    }
}
