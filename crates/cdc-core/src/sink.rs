//! The interface `BulkProcessor` holds every concrete backend behind.

use crate::error::Result;
use crate::model::Request;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Common interface every backend (analytics-DB, message-bus, file,
/// console) exposes to `BulkProcessor`. `cancel` carries the caller's
/// deadline/shutdown signal; a `Commit` implementation that performs
/// network I/O must honor it.
#[async_trait]
pub trait SinkClient: Send + Sync {
    fn name(&self) -> &str;

    /// True iff `TransformStage` must wrap the original document under
    /// a nested `__doc` key rather than spreading its fields directly
    /// into the row.
    fn embed_doc(&self) -> bool;

    async fn commit(&self, cancel: &CancellationToken, requests: &[Request]) -> Result<()>;
}
