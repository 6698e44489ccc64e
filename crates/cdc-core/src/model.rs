//! Core data model: change events, post-transform requests, and the
//! handful of pure helpers (table naming, timestamp encoding) shared by
//! every component that touches them.

use serde_json::Value;
use std::collections::BTreeMap;

/// Monotonic oplog-style timestamp: seconds since epoch plus an
/// in-second ordinal used to break ties between operations that land
/// in the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpTimestamp {
    pub epoch_seconds: u32,
    pub ordinal: u32,
}

impl OpTimestamp {
    pub fn new(epoch_seconds: u32, ordinal: u32) -> Self {
        Self {
            epoch_seconds,
            ordinal,
        }
    }

    /// `(seconds << 32) | ordinal`, the wire representation used for
    /// `__ver` on oplog-sourced events.
    pub fn to_version(self) -> u64 {
        ((self.epoch_seconds as u64) << 32) | self.ordinal as u64
    }
}

/// The kind of mutation a change event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Drop,
}

/// Where a change event originated: the tailed oplog, or an initial
/// bulk (direct) read of a namespace's current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Oplog,
    DirectRead,
}

/// An opaque document identity. In practice this is always an
/// ObjectId-shaped 12-byte value, carrying its own embedded creation
/// timestamp, but the engine does not otherwise interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(pub bson::oid::ObjectId);

impl DocumentId {
    /// Seconds-since-epoch embedded in the id, used to derive `__ver`
    /// for direct-read events and `__date` for every event.
    pub fn embedded_timestamp_seconds(&self) -> u32 {
        (self.0.timestamp().timestamp_millis() / 1_000) as u32
    }

    pub fn as_bson(&self) -> bson::Bson {
        bson::Bson::ObjectId(self.0)
    }

    /// Hex-string representation used when an id needs to sit inside a
    /// `serde_json::Value` document (e.g. the embed-mode `_id` field).
    pub fn as_json(&self) -> Value {
        Value::String(self.0.to_hex())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// A change event as emitted by the (out-of-scope) oplog / direct-read
/// producer. `data` may be partial for deletes — the producer is only
/// obligated to carry `id`.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub namespace: String,
    pub id: DocumentId,
    pub data: BTreeMap<String, Value>,
    pub timestamp: OpTimestamp,
    pub kind: ChangeKind,
    pub source: EventSource,
}

/// A document ready for a sink, after `TransformStage` has overlaid
/// system fields. Owned by exactly one `BulkProcessor` worker between
/// enqueue and commit.
#[derive(Debug, Clone)]
pub struct Request {
    pub namespace: String,
    pub id: DocumentId,
    pub doc: BTreeMap<String, Value>,
}

impl Request {
    /// Approximate wire size in bytes, used against the BulkProcessor's
    /// `batch_bytes` trigger. Cheap and conservative rather than exact:
    /// re-serializing every request on every enqueue would defeat the
    /// point of a byte-based trigger.
    pub fn approx_size_bytes(&self) -> usize {
        self.doc
            .iter()
            .map(|(k, v)| k.len() + approx_value_size(v))
            .sum::<usize>()
            + self.namespace.len()
    }
}

fn approx_value_size(v: &Value) -> usize {
    match v {
        Value::Null => 4,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(a) => a.iter().map(approx_value_size).sum(),
        Value::Object(o) => o.iter().map(|(k, v)| k.len() + approx_value_size(v)).sum(),
    }
}

/// A table identifier derived from a namespace for the analytics-DB
/// sink: `.` and `-` are replaced with `_`, then the configured
/// prefix/suffix are applied. Pure, deterministic, injective for
/// distinct `(namespace, prefix, suffix)` triples.
pub fn table_name(namespace: &str, prefix: &str, suffix: &str) -> String {
    let sanitized: String = namespace
        .chars()
        .map(|c| if c == '.' || c == '-' { '_' } else { c })
        .collect();
    format!("{prefix}{sanitized}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_replaces_dots_and_dashes() {
        assert_eq!(table_name("my-db.my-coll", "", ""), "my_db_my_coll");
    }

    #[test]
    fn table_name_applies_prefix_and_suffix() {
        assert_eq!(table_name("db.coll", "pre_", "_suf"), "pre_db_coll_suf");
    }

    #[test]
    fn table_name_distinguishes_non_colliding_namespaces() {
        assert_ne!(table_name("x.y.z", "p_", ""), table_name("x.y", "p_", ""));
        assert_ne!(table_name("a.b", "p_", ""), table_name("a.b", "q_", ""));
    }

    #[test]
    fn op_timestamp_version_packs_seconds_and_ordinal() {
        let ts = OpTimestamp::new(1_700_000_000, 7);
        assert_eq!(ts.to_version(), (1_700_000_000u64 << 32) | 7);
    }

    #[test]
    fn embedded_timestamp_seconds_matches_the_objectid_creation_time_in_seconds() {
        // 2023-11-14T22:13:20Z, a known fixed point so this test doesn't
        // depend on "now".
        let expected_seconds: u32 = 1_700_000_000;
        let oid = bson::oid::ObjectId::from_bytes({
            let mut bytes = [0u8; 12];
            bytes[0..4].copy_from_slice(&expected_seconds.to_be_bytes());
            bytes
        });
        let id = DocumentId(oid);
        assert_eq!(id.embedded_timestamp_seconds(), expected_seconds);
    }
}
