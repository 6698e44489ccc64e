//! Analytics-DB (ClickHouse) sink: groups requests by table, ensures
//! each table exists, optionally homogenizes schema across the batch,
//! and ships the result as a single gzip-compressed `JSONEachRow`
//! insert per table.

use crate::table_ensurer::TableEnsurer;
use cdc_core::config::ClickHouseConfig;
use cdc_core::error::{EngineError, Result};
use cdc_core::model::{table_name, Request};
use cdc_core::sink::SinkClient;
use cdc_schema::{coalesce_batch, NoopViewManager, ViewObserver};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ClickHouseSink {
    http: Client,
    endpoint: String,
    database: String,
    table_prefix: String,
    table_suffix: String,
    skip_unknown_fields: bool,
    date_time_best_effort: bool,
    auth: Option<(String, String)>,
    preprocess_namespace: Option<Regex>,
    preprocess_string_only: bool,
    dump_on_error: bool,
    ensurer: TableEnsurer,
    view_observer: Arc<dyn ViewObserver>,
}

impl ClickHouseSink {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        let auth = if config.auth.user.is_empty() {
            None
        } else {
            Some((config.auth.user.clone(), config.auth.password.clone()))
        };
        let preprocess_namespace = if config.preprocess_namespace_regex.is_empty() {
            None
        } else {
            Some(Regex::new(&config.preprocess_namespace_regex).map_err(|e| {
                EngineError::Config(format!("invalid preprocess-namespace-regex: {e}"))
            })?)
        };
        let http = Client::new();
        let ensurer = TableEnsurer::new(
            http.clone(),
            config.endpoint.clone(),
            config.database.clone(),
            auth.clone(),
        );
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            database: config.database.clone(),
            table_prefix: config.table_prefix.clone(),
            table_suffix: config.table_suffix.clone(),
            skip_unknown_fields: config.skip_unknown_fields,
            date_time_best_effort: config.date_time_best_effort,
            auth,
            preprocess_namespace,
            preprocess_string_only: config.preprocess_string_only,
            dump_on_error: config.dump_on_error,
            ensurer,
            view_observer: Arc::new(NoopViewManager),
        })
    }

    /// Attaches a `ViewObserver` (typically a `ViewManager`) that every
    /// successfully committed row is reported to, for derived-view SQL
    /// generation. Defaults to `NoopViewManager` when never called.
    pub fn with_view_observer(mut self, observer: Arc<dyn ViewObserver>) -> Self {
        self.view_observer = observer;
        self
    }

    fn table_for(&self, namespace: &str) -> String {
        table_name(namespace, &self.table_prefix, &self.table_suffix)
    }

    async fn batch_insert(&self, table: &str, rows: &[Map<String, Value>]) -> Result<()> {
        let mut ndjson = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut ndjson, &Value::Object(row.clone()))
                .map_err(|e| EngineError::PermanentCommit {
                    sink: "clickhouse".to_string(),
                    source: e.into(),
                })?;
            ndjson.push(b'\n');
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&ndjson)
            .map_err(|e| EngineError::TransientCommit {
                sink: "clickhouse".to_string(),
                source: e.into(),
            })?;
        let compressed = encoder
            .finish()
            .map_err(|e| EngineError::TransientCommit {
                sink: "clickhouse".to_string(),
                source: e.into(),
            })?;

        let query = format!(
            "INSERT INTO `{}`.`{}` FORMAT JSONEachRow",
            self.database, table
        );
        let mut params = vec![("query", query), ("input_format_import_nested_json", "1".to_string())];
        if self.skip_unknown_fields {
            params.push(("input_format_skip_unknown_fields", "1".to_string()));
        }
        if self.date_time_best_effort {
            params.push(("date_time_input_format", "best_effort".to_string()));
        }

        let mut request = self
            .http
            .post(&self.endpoint)
            .query(&params)
            .header("Content-Encoding", "gzip")
            .body(compressed);
        if let Some((user, password)) = &self.auth {
            request = request
                .header("X-ClickHouse-User", user)
                .header("X-ClickHouse-Key", password);
        }

        let response = request.send().await.map_err(|e| EngineError::TransientCommit {
            sink: "clickhouse".to_string(),
            source: e.into(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let source = anyhow::anyhow!("clickhouse returned {status}: {body}");
        if status.is_server_error() {
            Err(EngineError::TransientCommit {
                sink: "clickhouse".to_string(),
                source,
            })
        } else {
            if self.dump_on_error {
                dump_on_error(table, &self.database, rows);
            }
            Err(EngineError::PermanentCommit {
                sink: "clickhouse".to_string(),
                source,
            })
        }
    }
}

#[async_trait::async_trait]
impl SinkClient for ClickHouseSink {
    fn name(&self) -> &str {
        "clickhouse"
    }

    fn embed_doc(&self) -> bool {
        true
    }

    async fn commit(&self, _cancel: &CancellationToken, requests: &[Request]) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut by_table: BTreeMap<String, (String, Vec<Map<String, Value>>)> = BTreeMap::new();
        for request in requests {
            let table = self.table_for(&request.namespace);
            let row: Map<String, Value> = request
                .doc
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            by_table
                .entry(table)
                .or_insert_with(|| (request.namespace.clone(), Vec::new()))
                .1
                .push(row);
        }

        let tables: Vec<String> = by_table.keys().cloned().collect();
        self.ensurer.ensure(&tables).await?;

        for (table, (namespace, mut rows)) in by_table {
            if self
                .preprocess_namespace
                .as_ref()
                .is_some_and(|re| re.is_match(&namespace))
            {
                coalesce_batch(&mut rows, self.preprocess_string_only);
            }
            self.batch_insert(&table, &rows).await?;
            for row in &rows {
                self.view_observer.observe(&table, row.clone());
            }
        }
        Ok(())
    }
}

fn dump_on_error(table: &str, database: &str, rows: &[Map<String, Value>]) {
    use std::fs::File;
    use std::io::BufWriter;

    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let filename = format!("{database}_{table}_{timestamp}.ndjson");
    let file = match File::create(&filename) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(filename, error = %e, "failed to create dump-on-error file");
            return;
        }
    };
    let mut writer = BufWriter::new(file);
    for row in rows {
        if let Err(e) = serde_json::to_writer(&mut writer, &Value::Object(row.clone())) {
            tracing::error!(filename, error = %e, "failed to write dumped row");
            return;
        }
        let _ = writer.write_all(b"\n");
    }
    tracing::info!(filename, "dumped rejected batch for forensics");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> ClickHouseConfig {
        ClickHouseConfig {
            enabled: true,
            endpoint: "http://localhost:8123".to_string(),
            endpoint_tcp: String::new(),
            skip_unknown_fields: true,
            date_time_best_effort: true,
            database: "analytics".to_string(),
            table_prefix: String::new(),
            table_suffix: String::new(),
            http: true,
            preprocess_namespace_regex: "^app\\..*".to_string(),
            preprocess_string_only: false,
            dump_on_error: false,
            auth: Default::default(),
        }
    }

    #[test]
    fn table_for_applies_prefix_and_sanitizes_namespace() {
        let sink = ClickHouseSink::new(&make_config()).unwrap();
        assert_eq!(sink.table_for("app.orders"), "app_orders");
    }

    #[test]
    fn invalid_preprocess_regex_is_a_config_error() {
        let mut config = make_config();
        config.preprocess_namespace_regex = "(".to_string();
        let err = ClickHouseSink::new(&config).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn embed_doc_is_always_true_for_this_sink() {
        let sink = ClickHouseSink::new(&make_config()).unwrap();
        assert!(sink.embed_doc());
    }
}
