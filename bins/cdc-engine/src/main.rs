//! Demonstration wiring binary for the CDC sink delivery engine.
//!
//! Loads a TOML config, builds whichever `SinkClient` is enabled
//! (ClickHouse > Kafka > File > Console, the same priority
//! `factory.go`'s `CreateSink` uses), wires `TransformStage` ->
//! `BulkProcessor` -> that sink, and feeds it a small synthetic
//! stream of change events standing in for the out-of-scope oplog /
//! direct-read producer. Shuts down cooperatively on Ctrl-C.
//!
//! Also wires the two ambient collaborators that sit alongside the
//! bulk-commit path: a `ViewManager` observing every committed
//! ClickHouse row when `[clickhouse].http` is enabled, and an
//! `OffsetStore` checkpointing every direct-read event's id when
//! `[offset-store].enabled` is set.
//!
//! The console sink is the one exception to the bulk-processor path:
//! it bypasses `BulkProcessor` entirely and prints each event as it
//! arrives.

use anyhow::{Context, Result};
use cdc_bulk::{BulkObserver, BulkProcessor, BulkProcessorConfig, TransformStage};
use cdc_core::config::{EngineConfig, OffsetStoreConfig};
use cdc_core::metrics::Metrics;
use cdc_core::model::{ChangeEvent, ChangeKind, DocumentId, EventSource, OpTimestamp};
use cdc_core::sink::SinkClient;
use cdc_offset::{MongoOffsetStore, OffsetStore};
use cdc_schema::{ViewManager, ViewObserver};
use cdc_sinks::{ClickHouseSink, ConsolePrinter, FileSink, KafkaSink};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cdc-engine")]
#[command(about = "Change-data-capture sink delivery engine")]
struct Args {
    /// Path to a TOML config file matching `EngineConfig`'s shape.
    #[arg(short, long)]
    config: PathBuf,

    /// Number of synthetic change events to generate before closing
    /// the engine, standing in for the out-of-scope oplog/direct-read
    /// producer.
    #[arg(long, default_value_t = 20)]
    events: usize,
}

fn load_config(path: &PathBuf) -> Result<EngineConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path.as_path()))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;
    settings
        .try_deserialize()
        .context("deserializing engine config")
}

/// A handful of inserts/updates/deletes across two namespaces, enough
/// to exercise spread vs. embed transform, the version field, and a
/// tombstone. Every fifth event is tagged `DirectRead` rather than
/// `Oplog`, standing in for an initial bulk read's checkpointed
/// progress through a namespace.
fn synthetic_events(count: usize) -> Vec<ChangeEvent> {
    let mut events = Vec::with_capacity(count);
    for i in 0..count {
        let namespace = if i % 3 == 0 { "app.orders" } else { "app.users" };
        let mut data = BTreeMap::new();
        data.insert("seq".to_string(), serde_json::Value::from(i as u64));
        data.insert(
            "label".to_string(),
            serde_json::Value::String(format!("item-{i}")),
        );
        let kind = if i % 7 == 0 {
            ChangeKind::Delete
        } else if i == 0 {
            ChangeKind::Insert
        } else {
            ChangeKind::Update
        };
        let source = if i % 5 == 0 {
            EventSource::DirectRead
        } else {
            EventSource::Oplog
        };
        events.push(ChangeEvent {
            namespace: namespace.to_string(),
            id: DocumentId(bson::oid::ObjectId::new()),
            data,
            timestamp: OpTimestamp::new(1_700_000_000 + i as u32, 0),
            kind,
            source,
        });
    }
    events
}

struct LoggingObserver;

impl BulkObserver for LoggingObserver {
    fn before(&self, execution_id: i64, requests: &[cdc_core::model::Request]) {
        tracing::debug!(execution_id, batch_len = requests.len(), "committing batch");
    }

    fn after(
        &self,
        execution_id: i64,
        requests: &[cdc_core::model::Request],
        result: &cdc_core::error::Result<()>,
    ) {
        match result {
            Ok(()) => tracing::info!(execution_id, batch_len = requests.len(), "batch committed"),
            Err(err) => tracing::error!(execution_id, error = %err, "batch commit failed"),
        }
    }
}

/// ClickHouse > Kafka > File > Console, matching `factory.go`'s
/// `CreateSink` selection order. Returns `None` for console, since
/// that path never goes through `BulkProcessor`.
///
/// When ClickHouse is selected and `[clickhouse].http` is enabled, a
/// live `ViewManager` is started and attached to the sink so every
/// committed row is observed; the handle is also returned so the
/// caller can render its views at shutdown.
fn build_sink(
    config: &EngineConfig,
    cancel: &CancellationToken,
) -> Result<(Option<Arc<dyn SinkClient>>, Option<Arc<ViewManager>>)> {
    if config.clickhouse.enabled {
        let mut sink = ClickHouseSink::new(&config.clickhouse)?;
        let view_manager = if config.clickhouse.http {
            let manager = Arc::new(ViewManager::start(cancel.child_token()));
            sink = sink.with_view_observer(manager.clone());
            Some(manager)
        } else {
            None
        };
        return Ok((Some(Arc::new(sink)), view_manager));
    }
    if config.kafka.enabled {
        let sink = KafkaSink::new(&config.kafka)?;
        return Ok((Some(Arc::new(sink)), None));
    }
    if config.file.enabled {
        return Ok((Some(Arc::new(FileSink)), None));
    }
    Ok((None, None))
}

/// Connects to the offset store's backing MongoDB database when
/// `[offset-store].enabled` is set, otherwise a no-op.
async fn build_offset_store(config: &OffsetStoreConfig) -> Result<Option<Arc<dyn OffsetStore>>> {
    if !config.enabled {
        return Ok(None);
    }
    let client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .with_context(|| format!("connecting to offset store mongo at {}", config.mongo_uri))?;
    let store: Arc<dyn OffsetStore> = Arc::new(MongoOffsetStore::new(&client, &config.database));
    Ok(Some(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = cdc_core::metrics::install_recorder() {
        tracing::warn!(error = %e, "failed to install prometheus recorder, metrics will no-op");
    }

    let args = Args::parse();
    let mut config = load_config(&args.config)?;

    let cancel = CancellationToken::new();
    let metrics = Metrics::new();
    let events = synthetic_events(args.events);

    if config.console.enabled && !config.clickhouse.enabled && !config.kafka.enabled && !config.file.enabled {
        let printer = ConsolePrinter;
        for event in events {
            metrics.record_received(&event.namespace, op_name(event.kind));
            printer.print(&event);
        }
        tracing::info!("console sink drained synthetic stream, exiting");
        return Ok(());
    }

    let (Some(sink), view_manager) = build_sink(&config, &cancel)? else {
        anyhow::bail!("no sink enabled in config: set clickhouse.enabled, kafka.enabled, file.enabled, or console.enabled");
    };

    let offset_store = build_offset_store(&config.offset_store).await?;
    if let Some(store) = &offset_store {
        let loaded = store.load(&config.resume_name).await?;
        tracing::info!(
            resume_name = %config.resume_name,
            namespaces = loaded.len(),
            "loaded direct-read offsets"
        );
    }

    config.transform.embed_doc = sink.embed_doc();
    let transform = TransformStage::new(config.transform.clone());

    let processor = BulkProcessor::start(
        sink.clone(),
        Arc::new(LoggingObserver),
        metrics.clone(),
        BulkProcessorConfig {
            workers: config.bulk.workers,
            batch_actions: config.bulk.batch_size,
            batch_bytes: -1,
            flush_interval: Duration::from_secs(config.bulk.flush_interval_seconds),
        },
    );

    let producer_cancel = cancel.child_token();
    let resume_name = config.resume_name.clone();
    let mut producer = tokio::spawn(async move {
        for event in events {
            if producer_cancel.is_cancelled() {
                break;
            }
            metrics.record_received(&event.namespace, op_name(event.kind));
            metrics.set_current_op_ts(event.timestamp.epoch_seconds);
            let is_direct_read = matches!(event.source, EventSource::DirectRead);
            let namespace = event.namespace.clone();
            let offset = event.id.as_bson();
            let request = transform.transform(event);
            if processor.add(request).await.is_err() {
                break;
            }
            if is_direct_read {
                if let Some(store) = &offset_store {
                    if let Err(e) = store.save(&resume_name, &namespace, offset).await {
                        tracing::warn!(error = %e, namespace, "failed to checkpoint direct-read offset");
                    }
                }
            }
        }
        processor.close().await;
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            cancel.cancel();
            let _ = producer.await;
        }
        result = &mut producer => {
            let _ = result;
            tracing::info!("synthetic producer drained, engine exiting");
        }
    }

    if let Some(manager) = &view_manager {
        for view in manager.views() {
            tracing::info!(view, "derived view");
        }
    }

    Ok(())
}

fn op_name(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Insert => "insert",
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
        ChangeKind::Drop => "drop",
    }
}
