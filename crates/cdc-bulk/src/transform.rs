//! Turns a `ChangeEvent` into a sink-ready `Request` by overlaying the
//! configured system fields on top of either the event's own data
//! (spread mode) or a one-field wrapper around it (embed mode).

use cdc_core::config::TransformConfig;
use cdc_core::model::{ChangeEvent, ChangeKind, EventSource, Request};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct TransformStage {
    config: TransformConfig,
}

impl TransformStage {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// `event.id` is always a valid `bson::oid::ObjectId` by
    /// construction (`DocumentId` has no other constructor), so unlike
    /// the id-shape check this mirrors, there is no "skip with a
    /// warning" branch here — an ill-typed id simply cannot reach this
    /// function.
    pub fn transform(&self, event: ChangeEvent) -> Request {
        let mut doc: BTreeMap<String, Value> = if self.config.embed_doc {
            let mut wrapper = BTreeMap::new();
            wrapper.insert("_id".to_string(), event.id.as_json());
            wrapper.insert(
                self.config.system_field_embed_doc.clone(),
                Value::Object(event.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            );
            wrapper
        } else {
            event.data.clone()
        };

        doc.insert(
            self.config.system_field_namespace.clone(),
            Value::String(event.namespace.clone()),
        );
        doc.insert(
            self.config.system_field_sync_time.clone(),
            Value::Number(Utc::now().timestamp().into()),
        );

        if matches!(event.kind, ChangeKind::Delete) {
            doc.insert(self.config.system_field_virtual_delete.clone(), Value::from(1));
        }

        let id_timestamp = event.id.embedded_timestamp_seconds();
        let version = match event.source {
            EventSource::Oplog => {
                doc.insert(
                    self.config.system_field_op_time.clone(),
                    Value::from(event.timestamp.epoch_seconds),
                );
                event.timestamp.to_version()
            }
            EventSource::DirectRead => (id_timestamp as u64) << 32,
        };
        doc.insert(self.config.system_field_version.clone(), Value::from(version));

        let date = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(id_timestamp as i64);
        doc.insert(
            self.config.system_field_date.clone(),
            Value::String(date.format("%Y-%m-%d").to_string()),
        );

        if let Some(Value::String(update_time)) = event.data.get("updateTime") {
            if let Some(millis) = parse_update_time(update_time) {
                doc.insert("__update_time".to_string(), Value::from(millis));
            }
        }

        Request {
            namespace: event.namespace,
            id: event.id,
            doc,
        }
    }
}

fn parse_update_time(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::model::{DocumentId, OpTimestamp};
    use serde_json::json;

    fn event(kind: ChangeKind, source: EventSource) -> ChangeEvent {
        ChangeEvent {
            namespace: "d.c".to_string(),
            id: DocumentId(bson::oid::ObjectId::new()),
            data: [("k".to_string(), json!(1))].into_iter().collect(),
            timestamp: OpTimestamp::new(1_700_000_000, 3),
            kind,
            source,
        }
    }

    #[test]
    fn spread_mode_merges_system_fields_alongside_original_data() {
        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(event(ChangeKind::Update, EventSource::Oplog));
        assert_eq!(request.doc.get("k"), Some(&json!(1)));
        assert_eq!(request.doc.get("__ns"), Some(&json!("d.c")));
        assert!(request.doc.contains_key("__sync_time"));
    }

    #[test]
    fn embed_mode_wraps_original_data_under_configured_key() {
        let mut config = TransformConfig::default();
        config.embed_doc = true;
        let stage = TransformStage::new(config);
        let request = stage.transform(event(ChangeKind::Insert, EventSource::DirectRead));
        assert!(!request.doc.contains_key("k"));
        let doc = request.doc.get("__doc").unwrap().as_object().unwrap();
        assert_eq!(doc.get("k"), Some(&json!(1)));
    }

    #[test]
    fn delete_sets_virtual_delete_flag() {
        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(event(ChangeKind::Delete, EventSource::Oplog));
        assert_eq!(request.doc.get("__is_deleted"), Some(&json!(1)));
    }

    #[test]
    fn oplog_version_packs_seconds_and_ordinal() {
        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(event(ChangeKind::Update, EventSource::Oplog));
        let expected = (1_700_000_000u64 << 32) | 3;
        assert_eq!(request.doc.get("__ver"), Some(&json!(expected)));
    }

    #[test]
    fn version_is_monotonic_for_the_same_id_across_later_timestamps() {
        let stage = TransformStage::new(TransformConfig::default());
        let id = DocumentId(bson::oid::ObjectId::new());

        let mut earlier = event(ChangeKind::Update, EventSource::Oplog);
        earlier.id = id.clone();
        earlier.timestamp = OpTimestamp::new(1_700_000_000, 5);

        let mut later = event(ChangeKind::Update, EventSource::Oplog);
        later.id = id;
        later.timestamp = OpTimestamp::new(1_700_000_000, 9);

        let earlier_ver = stage.transform(earlier).doc["__ver"].as_u64().unwrap();
        let later_ver = stage.transform(later).doc["__ver"].as_u64().unwrap();
        assert!(later_ver > earlier_ver);
    }

    #[test]
    fn direct_read_version_has_a_zero_ordinal_and_a_real_seconds_timestamp() {
        // Fixed ObjectId creation time (2023-11-14T22:13:20Z) so the
        // expected value is computed independently of the method under
        // test, rather than by calling it a second time.
        let expected_seconds: u32 = 1_700_000_000;
        let oid = bson::oid::ObjectId::from_bytes({
            let mut bytes = [0u8; 12];
            bytes[0..4].copy_from_slice(&expected_seconds.to_be_bytes());
            bytes
        });
        let mut e = event(ChangeKind::Update, EventSource::DirectRead);
        e.id = DocumentId(oid);

        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(e);
        let expected = (expected_seconds as u64) << 32;
        assert_eq!(request.doc.get("__ver"), Some(&json!(expected)));
    }

    #[test]
    fn date_field_reflects_the_objectid_creation_year_not_the_epoch() {
        let expected_seconds: u32 = 1_700_000_000; // 2023-11-14
        let oid = bson::oid::ObjectId::from_bytes({
            let mut bytes = [0u8; 12];
            bytes[0..4].copy_from_slice(&expected_seconds.to_be_bytes());
            bytes
        });
        let mut e = event(ChangeKind::Update, EventSource::Oplog);
        e.id = DocumentId(oid);

        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(e);
        assert_eq!(request.doc.get("__date"), Some(&json!("2023-11-14")));
    }

    #[test]
    fn update_time_string_is_parsed_into_unix_millis() {
        let mut e = event(ChangeKind::Update, EventSource::Oplog);
        e.data
            .insert("updateTime".to_string(), json!("2024-01-20T16:00:43.516Z"));
        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(e);
        assert!(request.doc.contains_key("__update_time"));
    }

    #[test]
    fn malformed_update_time_is_silently_skipped() {
        let mut e = event(ChangeKind::Update, EventSource::Oplog);
        e.data.insert("updateTime".to_string(), json!("not-a-time"));
        let stage = TransformStage::new(TransformConfig::default());
        let request = stage.transform(e);
        assert!(!request.doc.contains_key("__update_time"));
    }
}
