//! # cdc-core
//!
//! Shared data model, error taxonomy, configuration structs and metrics
//! surface for the change-data-capture sink delivery engine. Downstream
//! crates (`cdc-schema`, `cdc-sinks`, `cdc-bulk`, `cdc-offset`) depend on
//! this crate and nothing lower; it has no knowledge of any concrete
//! sink, transport, or storage backend.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod sink;

pub use config::*;
pub use error::EngineError;
pub use metrics::Metrics;
pub use model::*;
pub use sink::SinkClient;
