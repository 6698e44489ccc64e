//! Black-hole debug sink: accepts every batch, writes nothing.

use cdc_core::error::Result;
use cdc_core::model::Request;
use cdc_core::sink::SinkClient;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileSink;

#[async_trait::async_trait]
impl SinkClient for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn embed_doc(&self) -> bool {
        false
    }

    async fn commit(&self, _cancel: &CancellationToken, requests: &[Request]) -> Result<()> {
        tracing::debug!(count = requests.len(), "file sink discarding batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::model::DocumentId;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn commit_always_succeeds() {
        let sink = FileSink;
        let cancel = CancellationToken::new();
        let requests = vec![Request {
            namespace: "db.coll".to_string(),
            id: DocumentId(bson::oid::ObjectId::new()),
            doc: BTreeMap::new(),
        }];
        sink.commit(&cancel, &requests).await.unwrap();
    }
}
