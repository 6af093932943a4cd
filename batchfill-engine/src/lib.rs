//! Deferred batch-join engine.
//!
//! Callers register many small "I need the records for this key" requests
//! and the engine later runs exactly one bulk fetch per registration,
//! routing every fetched record back to the targets that asked for it.
//!
//! # Architecture
//!
//! - **Condition builder**: merges per-target conditions into one predicate
//! - **Key index**: maps target keys to the targets waiting on them
//! - **Data handler**: applies each fetched record to its target
//! - **Subscription**: the handle targets are added to
//! - **Fill engine**: owns pending subscriptions and runs fill cycles
//!
//! # Example
//!
//! ```
//! use batchfill_engine::source::memory::MemorySource;
//! use batchfill_engine::{FillEngine, JoinOptions};
//! use batchfill_model::Target;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let engine = FillEngine::new();
//! let children = Arc::new(MemorySource::with_records("children", [
//!     json!({"parentId": 1, "name": "a"}),
//!     json!({"parentId": 1, "name": "b"}),
//! ]));
//!
//! let subscription = engine
//!     .subscribe(
//!         children,
//!         JoinOptions::new("children")
//!             .with_foreign_field("parentId")
//!             .with_source_field("name")
//!             .multiple(),
//!     )
//!     .unwrap();
//!
//! let parent = Target::from_value(json!({"id": 1})).unwrap();
//! subscription.add(&parent).unwrap();
//! engine.fill_subscriptions().await.unwrap();
//!
//! assert_eq!(parent.get("children"), Some(json!(["a", "b"])));
//! # });
//! ```

mod condition;
mod engine;
mod error;
mod handler;
mod index;
mod options;
pub mod source;
mod strategy;
mod subscription;

pub use condition::ConditionBuilder;
pub use engine::{FetchSummary, FillEngine, FillSummary};
pub use error::{JoinError, JoinResult};
pub use handler::DataHandler;
pub use index::KeyIndex;
pub use options::{DEFAULT_PARALLELISM, EngineConfig, FetchMode, JoinOptions, JoinPlan};
pub use source::{RecordSource, RecordStream};
pub use strategy::{AssignFn, JoinStrategy, RecordFn, TargetFn};
pub use subscription::Subscription;
