//! Observes every committed document asynchronously and renders
//! derived-view SQL from the union of keys seen per table.
//!
//! REDESIGNED relative to the source's synchronous, mutex-guarded
//! collector: ingestion goes through a bounded (1024) channel drained
//! by a single consumer task, and a full channel drops the
//! observation rather than blocking. View generation is purely
//! observational — it must never be able to stall a commit.

use crate::collector::FieldCollector;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Anything that can observe a committed document and later render
/// its accumulated views. `NoopViewManager` implements this with both
/// operations as no-ops, for when the feature is disabled.
pub trait ViewObserver: Send + Sync {
    fn observe(&self, table: &str, doc: Map<String, Value>);
    fn views(&self) -> Vec<String>;
}

const INGEST_CAPACITY: usize = 1024;

pub struct ViewManager {
    tx: mpsc::Sender<(String, Map<String, Value>)>,
    collectors: Arc<Mutex<HashMap<String, Arc<FieldCollector>>>>,
}

impl ViewManager {
    /// Spawns the single consumer task and returns a handle producers
    /// can clone cheaply (the sender half of an mpsc channel is
    /// `Clone`). `cancel` stops the consumer task cooperatively.
    pub fn start(cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, Map<String, Value>)>(INGEST_CAPACITY);
        let collectors: Arc<Mutex<HashMap<String, Arc<FieldCollector>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let consumer_collectors = collectors.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => {
                        match received {
                            Some((table, doc)) => {
                                let collector = {
                                    let mut guard = consumer_collectors
                                        .lock()
                                        .expect("view manager collectors mutex poisoned");
                                    guard
                                        .entry(table.clone())
                                        .or_insert_with(|| Arc::new(FieldCollector::new(table)))
                                        .clone()
                                };
                                collector.collect(&doc);
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Self { tx, collectors }
    }
}

impl ViewObserver for ViewManager {
    fn observe(&self, table: &str, doc: Map<String, Value>) {
        match self.tx.try_send((table.to_string(), doc)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(table, "view ingestion channel saturated, dropping observation");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(table, "view ingestion channel closed, dropping observation");
            }
        }
    }

    fn views(&self) -> Vec<String> {
        let guard = self
            .collectors
            .lock()
            .expect("view manager collectors mutex poisoned");
        let mut rendered: Vec<String> = guard
            .values()
            .map(|collector| render_view(collector.table(), &collector.get_keys()))
            .collect();
        rendered.sort();
        rendered
    }
}

/// No-op stand-in used when the view-rendering feature is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopViewManager;

impl ViewObserver for NoopViewManager {
    fn observe(&self, _table: &str, _doc: Map<String, Value>) {}
    fn views(&self) -> Vec<String> {
        Vec::new()
    }
}

fn render_view(table: &str, keys: &[String]) -> String {
    let columns = keys
        .iter()
        .map(|k| format!("`{k}`"))
        .collect::<Vec<_>>()
        .join(",");
    format!("CREATE VIEW IF NOT EXISTS {table}_view AS SELECT {columns} FROM {table}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn observed_documents_show_up_in_rendered_views() {
        let cancel = CancellationToken::new();
        let manager = ViewManager::start(cancel.clone());

        manager.observe("orders", json!({"id": 1, "total": 9.5}).as_object().unwrap().clone());
        manager.observe("orders", json!({"currency": "usd"}).as_object().unwrap().clone());

        // give the consumer task a chance to drain the channel
        tokio::time::sleep(Duration::from_millis(50)).await;

        let views = manager.views();
        assert_eq!(views.len(), 1);
        assert!(views[0].starts_with("CREATE VIEW IF NOT EXISTS orders_view"));
        assert!(views[0].contains("`currency`"));
        assert!(views[0].contains("`id`"));
        assert!(views[0].contains("`total`"));

        cancel.cancel();
    }

    #[test]
    fn noop_manager_never_accumulates_anything() {
        let manager = NoopViewManager;
        manager.observe("t", json!({"a": 1}).as_object().unwrap().clone());
        assert!(manager.views().is_empty());
    }
}
