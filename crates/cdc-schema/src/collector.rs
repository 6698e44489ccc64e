//! Per-table aggregator over `SchemaTraveler`'s Collect pass: observes
//! every committed document for one table and exposes the union of
//! leaf keys seen so far, for `ViewManager` to render as a `CREATE
//! VIEW`.

use crate::traveler::SchemaTraveler;
use serde_json::{Map, Value};
use std::sync::Mutex;

/// Mutex-guarded accumulator for one table's observed scalar keys.
pub struct FieldCollector {
    table: String,
    traveler: Mutex<SchemaTraveler>,
}

impl FieldCollector {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            traveler: Mutex::new(SchemaTraveler::new()),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn collect(&self, doc: &Map<String, Value>) {
        self.traveler
            .lock()
            .expect("field collector mutex poisoned")
            .collect(doc);
    }

    /// Sorted list of leaf keys observed so far, excluding array paths.
    pub fn get_keys(&self) -> Vec<String> {
        self.traveler
            .lock()
            .expect("field collector mutex poisoned")
            .scalar_keys_excluding_arrays()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accumulates_keys_across_multiple_documents() {
        let collector = FieldCollector::new("my_table");
        collector.collect(json!({"a": 1, "b": {"c": "x"}}).as_object().unwrap());
        collector.collect(json!({"d": true}).as_object().unwrap());
        assert_eq!(collector.get_keys(), vec!["a", "b.c", "d"]);
    }

    #[test]
    fn excludes_array_sampled_paths() {
        let collector = FieldCollector::new("my_table");
        collector.collect(json!({"tags": [1, 2, 3]}).as_object().unwrap());
        assert!(collector.get_keys().is_empty());
    }
}
