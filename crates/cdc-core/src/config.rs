//! Typed configuration structs mirroring the TOML shape the engine
//! recognizes. Loading a file into these structs is a thin concern
//! left to the demonstration binary (`bins/cdc-engine`); the engine's
//! constructors take these structs directly, never a file path.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(rename = "resume-name", default)]
    pub resume_name: String,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(rename = "offset-store", default)]
    pub offset_store: OffsetStoreConfig,
}

/// Connection details for the `OffsetStore`'s backing collection in the
/// source document store (§4.7). Not part of spec.md's own `[bulk]` /
/// `[clickhouse]` / `[kafka]` tables, but the natural extension of the
/// same `resume-name` the spec already defines at the top level.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OffsetStoreConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mongo_uri: String,
    #[serde(default)]
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BulkConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            flush_interval_seconds: default_flush_interval_seconds(),
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_batch_size() -> i64 {
    1000
}
fn default_flush_interval_seconds() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransformConfig {
    #[serde(default = "default_version_field")]
    pub system_field_version: String,
    #[serde(default = "default_virtual_delete_field")]
    pub system_field_virtual_delete: String,
    #[serde(default = "default_date_field")]
    pub system_field_date: String,
    #[serde(default = "default_namespace_field")]
    pub system_field_namespace: String,
    #[serde(default = "default_op_time_field")]
    pub system_field_op_time: String,
    #[serde(default = "default_sync_time_field")]
    pub system_field_sync_time: String,
    #[serde(default = "default_embed_doc_field")]
    pub system_field_embed_doc: String,
    /// Not a TOML field (mirrors the source's `toml:"-"` tag): set by
    /// the engine from `SinkClient::embed_doc()` once the sink is
    /// constructed, not read from configuration.
    #[serde(skip, default)]
    pub embed_doc: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            system_field_version: default_version_field(),
            system_field_virtual_delete: default_virtual_delete_field(),
            system_field_date: default_date_field(),
            system_field_namespace: default_namespace_field(),
            system_field_op_time: default_op_time_field(),
            system_field_sync_time: default_sync_time_field(),
            system_field_embed_doc: default_embed_doc_field(),
            embed_doc: false,
        }
    }
}

fn default_version_field() -> String {
    "__ver".to_string()
}
fn default_virtual_delete_field() -> String {
    "__is_deleted".to_string()
}
fn default_date_field() -> String {
    "__date".to_string()
}
fn default_namespace_field() -> String {
    "__ns".to_string()
}
fn default_op_time_field() -> String {
    "__op_time".to_string()
}
fn default_sync_time_field() -> String {
    "__sync_time".to_string()
}
fn default_embed_doc_field() -> String {
    "__doc".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ClickHouseAuthConfig {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ClickHouseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub endpoint_tcp: String,
    #[serde(default)]
    pub skip_unknown_fields: bool,
    #[serde(default)]
    pub date_time_best_effort: bool,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table_prefix: String,
    #[serde(default)]
    pub table_suffix: String,
    #[serde(default)]
    pub http: bool,
    #[serde(default)]
    pub preprocess_namespace_regex: String,
    #[serde(default)]
    pub preprocess_string_only: bool,
    #[serde(default)]
    pub dump_on_error: bool,
    #[serde(default)]
    pub auth: ClickHouseAuthConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct KafkaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub kafka_brokers: String,
    #[serde(default = "default_kafka_topic_prefix")]
    pub kafka_topic_prefix: String,
}

fn default_kafka_topic_prefix() -> String {
    "monstache.".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub enabled: bool,
}
