//! Message-bus sink: one record per `Request`, all submitted in a
//! single batched publish with `acks=all`.

use cdc_core::config::KafkaConfig;
use cdc_core::error::{EngineError, Result};
use cdc_core::model::Request;
use cdc_core::sink::SinkClient;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct KafkaSink {
    producer: FutureProducer,
    topic_prefix: String,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("acks", "all")
            .set("allow.auto.create.topics", "true")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| EngineError::Config(format!("failed to build kafka producer: {e}")))?;
        Ok(Self {
            producer,
            topic_prefix: config.kafka_topic_prefix.clone(),
        })
    }

    fn topic_for(&self, namespace: &str) -> String {
        format!("{}{namespace}", self.topic_prefix)
    }
}

#[async_trait::async_trait]
impl SinkClient for KafkaSink {
    fn name(&self) -> &str {
        "kafka"
    }

    fn embed_doc(&self) -> bool {
        false
    }

    async fn commit(&self, _cancel: &CancellationToken, requests: &[Request]) -> Result<()> {
        let mut publishes = Vec::with_capacity(requests.len());
        for request in requests {
            let topic = self.topic_for(&request.namespace);
            let key = request.id.to_string();
            let value = serde_json::to_vec(&request.doc).map_err(|e| EngineError::PermanentCommit {
                sink: "kafka".to_string(),
                source: e.into(),
            })?;
            publishes.push((topic, key, value));
        }

        let sends = publishes.iter().map(|(topic, key, value)| {
            let record = FutureRecord::to(topic).key(key).payload(value);
            self.producer.send(record, Duration::from_secs(0))
        });

        for result in futures::future::join_all(sends).await {
            result.map_err(|(err, _)| EngineError::TransientCommit {
                sink: "kafka".to_string(),
                source: anyhow::anyhow!(err.to_string()),
            })?;
        }
        Ok(())
    }
}
