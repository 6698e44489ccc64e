//! # cdc-schema
//!
//! Dynamic-schema inference for the columnar analytics sink: walking
//! sparse, schemaless documents and coalescing them into a batch-wide
//! consistent key set (`traveler`), aggregating observed keys per
//! table for derived views (`collector`, `view`). `table_name` (the
//! pure namespace-to-table mapping) lives in `cdc-core` since every
//! downstream crate needs it, not just this one; it is re-exported
//! here for convenience.

pub mod collector;
pub mod traveler;
pub mod view;

pub use cdc_core::table_name;
pub use collector::FieldCollector;
pub use traveler::{coalesce_batch, SchemaTraveler, TypeTag};
pub use view::{NoopViewManager, ViewManager, ViewObserver};
