//! Record source abstraction.
//!
//! The engine's only I/O goes through [`RecordSource::get_stream`]. A source
//! translates a [`Predicate`] into its own query syntax and streams back the
//! matching records.

use crate::error::JoinResult;
use async_trait::async_trait;
use batchfill_model::Predicate;
use futures::stream::BoxStream;
use serde_json::Value;

pub mod memory;

/// Stream of fetched records. A failed item fails the fetch it belongs to.
pub type RecordStream = BoxStream<'static, JoinResult<Value>>;

/// A store that can stream every record matching a predicate.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Name used in logs, summaries and errors.
    fn name(&self) -> &str;

    /// Opens a stream over the records matching `predicate`.
    ///
    /// The stream may deliver records in any order and may include records
    /// no target asked for. Open failures should be reported as
    /// [`JoinError::Source`](crate::JoinError::Source).
    async fn get_stream(&self, predicate: &Predicate) -> JoinResult<RecordStream>;
}
