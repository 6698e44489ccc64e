//! Lazy create-if-absent for the analytics-DB sink: a local cache
//! guarded by a mutex, backed by a remote existence check against
//! `system.tables` and a `CREATE TABLE` DDL for whatever the cache and
//! the remote check both miss.

use cdc_core::error::{EngineError, Result};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Mutex;

const CREATE_TABLE_TEMPLATE: &str = r#"
CREATE TABLE
    IF NOT EXISTS {database}.{table} (
        _id String,
        __doc JSON,
        __date Date,
        __ver UInt64 DEFAULT 0,
        __is_deleted UInt8 DEFAULT 0,
        __ns String DEFAULT '',
        __op_time UInt64 DEFAULT 0,
        __sync_time UInt64 DEFAULT 0
    ) ENGINE = ReplacingMergeTree (__ver, __is_deleted)
PARTITION BY
    __date
ORDER BY
    _id;
"#;

pub struct TableEnsurer {
    http: Client,
    endpoint: String,
    database: String,
    auth: Option<(String, String)>,
    cache: Mutex<HashSet<String>>,
    experimental_object_type_set: Mutex<bool>,
}

impl TableEnsurer {
    pub fn new(
        http: Client,
        endpoint: String,
        database: String,
        auth: Option<(String, String)>,
    ) -> Self {
        Self {
            http,
            endpoint,
            database,
            auth,
            cache: Mutex::new(HashSet::new()),
            experimental_object_type_set: Mutex::new(false),
        }
    }

    /// Ensures every table in `tables` exists, creating whichever ones
    /// the local cache and the remote `system.tables` check both miss.
    pub async fn ensure(&self, tables: &[String]) -> Result<()> {
        let missing: Vec<String> = {
            let cache = self.cache.lock().expect("table ensurer cache poisoned");
            tables
                .iter()
                .filter(|t| !cache.contains(t.as_str()))
                .cloned()
                .collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let existing = self.check_existing(&missing).await?;
        self.ensure_object_type_setting().await?;

        for table in &missing {
            if !existing.contains(table) {
                self.create_table(table).await?;
            }
        }

        let mut cache = self.cache.lock().expect("table ensurer cache poisoned");
        cache.extend(missing);
        Ok(())
    }

    async fn check_existing(&self, tables: &[String]) -> Result<HashSet<String>> {
        let quoted = tables
            .iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(",");
        let query = format!(
            "SELECT name FROM system.tables WHERE database = '{}' AND name IN ({quoted}) FORMAT JSONEachRow",
            self.database
        );
        let body = self.execute(&query).await?;
        let mut existing = HashSet::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            if let Ok(row) = serde_json::from_str::<serde_json::Value>(line) {
                if let Some(name) = row.get("name").and_then(|v| v.as_str()) {
                    existing.insert(name.to_string());
                }
            }
        }
        Ok(existing)
    }

    async fn ensure_object_type_setting(&self) -> Result<()> {
        let mut set = self
            .experimental_object_type_set
            .lock()
            .expect("table ensurer setting flag poisoned");
        if *set {
            return Ok(());
        }
        self.execute("SET allow_experimental_object_type = 1").await?;
        *set = true;
        Ok(())
    }

    async fn create_table(&self, table: &str) -> Result<()> {
        let ddl = CREATE_TABLE_TEMPLATE
            .replace("{database}", &self.database)
            .replace("{table}", table);
        tracing::info!(database = %self.database, table, "creating analytics table");
        self.execute(&ddl).await?;
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<String> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .query(&[("query", query)]);
        if let Some((user, password)) = &self.auth {
            request = request
                .header("X-ClickHouse-User", user)
                .header("X-ClickHouse-Key", password);
        }
        let response = request.send().await.map_err(|e| EngineError::TableEnsure {
            table: self.database.clone(),
            source: e.into(),
        })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(EngineError::TableEnsure {
                table: self.database.clone(),
                source: anyhow::anyhow!("clickhouse returned {status}: {body}"),
            });
        }
        Ok(body)
    }
}
