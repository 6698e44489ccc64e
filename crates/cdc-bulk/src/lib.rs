//! # cdc-bulk
//!
//! The concurrent batching engine (`BulkProcessor`) and the
//! change-event-to-row transform (`TransformStage`) that feeds it.
//! Everything downstream of `cdc-core`'s `SinkClient` trait and
//! `cdc-schema`'s table naming lives here; this crate has no
//! knowledge of any concrete sink backend.

pub mod processor;
pub mod transform;

pub use processor::{BulkObserver, BulkProcessor, BulkProcessorConfig, NoopObserver};
pub use transform::TransformStage;
