//! # cdc-sinks
//!
//! Concrete `SinkClient` backends and the analytics-DB `TableEnsurer`
//! they share.

pub mod sink_clickhouse;
pub mod sink_console;
pub mod sink_file;
pub mod sink_kafka;
pub mod table_ensurer;

pub use sink_clickhouse::ClickHouseSink;
pub use sink_console::{ConsolePrinter, ConsoleSink};
pub use sink_file::FileSink;
pub use sink_kafka::KafkaSink;
pub use table_ensurer::TableEnsurer;
