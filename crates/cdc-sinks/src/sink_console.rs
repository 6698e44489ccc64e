//! Console sink: prints each change event as it arrives and bypasses
//! `BulkProcessor` entirely — there is no batching, retry, or
//! transform involved, just a line per event. `ConsolePrinter` is what
//! the engine wiring calls directly; `ConsoleSink` exists so the sink
//! factory can still hand out a uniformly-typed `SinkClient` for
//! configurations that select `console` without special-casing it.

use cdc_core::error::Result;
use cdc_core::model::{ChangeEvent, Request};
use cdc_core::sink::SinkClient;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrinter;

impl ConsolePrinter {
    pub fn print(&self, event: &ChangeEvent) {
        println!(
            "{:?} {} {} {:?}",
            event.kind, event.namespace, event.id, event.data
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

#[async_trait::async_trait]
impl SinkClient for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn embed_doc(&self) -> bool {
        false
    }

    async fn commit(&self, _cancel: &CancellationToken, requests: &[Request]) -> Result<()> {
        for request in requests {
            println!("{} {} {:?}", request.namespace, request.id, request.doc);
        }
        Ok(())
    }
}
