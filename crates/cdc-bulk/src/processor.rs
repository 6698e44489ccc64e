//! Concurrent bulk-commit processor: N workers pull from one shared
//! request channel, accumulate a local batch, and commit it to the
//! configured `SinkClient` once a count/byte trigger fires or a
//! periodic flusher asks. Retries use exponential backoff capped at 3
//! retries (4 attempts total); `Close` drains every buffered request
//! before returning.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use cdc_core::error::Result;
use cdc_core::metrics::Metrics;
use cdc_core::model::Request;
use cdc_core::sink::SinkClient;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct BulkProcessorConfig {
    /// Number of concurrent worker tasks, clamped to at least 1.
    pub workers: usize,
    /// Commit once the local batch reaches this many requests. `-1`
    /// disables the count trigger.
    pub batch_actions: i64,
    /// Commit once the local batch's approximate size reaches this
    /// many bytes. `-1` disables the byte trigger.
    pub batch_bytes: i64,
    /// Periodic flush interval. `Duration::ZERO` disables the
    /// periodic flusher entirely (size/count triggers still apply).
    pub flush_interval: Duration,
}

/// Observes commit attempts. `before` runs synchronously ahead of the
/// commit call; `after` runs once per attempt with the final
/// (post-retry) outcome. Exists as a trait rather than a pair of free
/// function pointers so implementations can carry their own state
/// (e.g. a test harness counting invocations).
pub trait BulkObserver: Send + Sync {
    fn before(&self, _execution_id: i64, _requests: &[Request]) {}
    fn after(&self, _execution_id: i64, _requests: &[Request], _result: &Result<()>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;
impl BulkObserver for NoopObserver {}

pub struct BulkProcessor {
    tx: mpsc::Sender<Request>,
    flush_senders: Vec<mpsc::Sender<oneshot::Sender<()>>>,
    flusher_cancel: CancellationToken,
    flusher_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl BulkProcessor {
    pub fn start(
        sink: Arc<dyn SinkClient>,
        observer: Arc<dyn BulkObserver>,
        metrics: Metrics,
        config: BulkProcessorConfig,
    ) -> Self {
        let workers = config.workers.max(1);
        // Capacity 1 is the closest practical rendezvous to the
        // source's synchronous (unbuffered) channel hand-off.
        let (tx, rx) = mpsc::channel::<Request>(1);
        let shared_rx = Arc::new(Mutex::new(rx));
        let execution_id = Arc::new(AtomicI64::new(0));

        let mut worker_handles = Vec::with_capacity(workers);
        let mut flush_senders = Vec::with_capacity(workers);

        for index in 0..workers {
            let (flush_tx, flush_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
            flush_senders.push(flush_tx);

            let shared_rx = shared_rx.clone();
            let sink = sink.clone();
            let observer = observer.clone();
            let metrics = metrics.clone();
            let execution_id = execution_id.clone();
            worker_handles.push(tokio::spawn(worker_loop(
                index,
                shared_rx,
                flush_rx,
                sink,
                observer,
                metrics,
                config,
                execution_id,
            )));
        }

        let flusher_cancel = CancellationToken::new();
        let flusher_handle = if config.flush_interval > Duration::ZERO {
            Some(tokio::spawn(flusher_loop(
                config.flush_interval,
                flush_senders.clone(),
                flusher_cancel.clone(),
            )))
        } else {
            None
        };

        Self {
            tx,
            flush_senders,
            flusher_cancel,
            flusher_handle,
            worker_handles,
        }
    }

    /// Blocking enqueue: awaits until a worker is ready to accept the
    /// request. Returns the request back to the caller if the
    /// processor has already been closed.
    pub async fn add(&self, request: Request) -> std::result::Result<(), Request> {
        self.tx.send(request).await.map_err(|e| e.0)
    }

    /// Asks every worker to commit its outstanding batch, serially,
    /// waiting for each to acknowledge before moving to the next.
    pub async fn flush(&self) {
        for sender in &self.flush_senders {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(ack_tx).await.is_err() {
                continue;
            }
            let _ = ack_rx.await;
        }
    }

    /// Stops the flusher, closes the request channel, and waits for
    /// every worker to drain its remaining buffered requests.
    pub async fn close(self) {
        self.flusher_cancel.cancel();
        if let Some(handle) = self.flusher_handle {
            let _ = handle.await;
        }
        drop(self.tx);
        drop(self.flush_senders);
        for handle in self.worker_handles {
            let _ = handle.await;
        }
    }
}

async fn flusher_loop(
    interval: Duration,
    flush_senders: Vec<mpsc::Sender<oneshot::Sender<()>>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("flusher stopping");
                return;
            }
            _ = ticker.tick() => {
                for sender in &flush_senders {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    if sender.send(ack_tx).await.is_err() {
                        continue;
                    }
                    let _ = ack_rx.await;
                }
            }
        }
    }
}

fn commit_required(batch_len: usize, batch_bytes: i64, config: &BulkProcessorConfig) -> bool {
    if config.batch_actions >= 0 && batch_len as i64 >= config.batch_actions {
        return true;
    }
    if config.batch_bytes >= 0 && batch_bytes >= config.batch_bytes {
        return true;
    }
    false
}

async fn worker_loop(
    index: usize,
    shared_rx: Arc<Mutex<mpsc::Receiver<Request>>>,
    mut flush_rx: mpsc::Receiver<oneshot::Sender<()>>,
    sink: Arc<dyn SinkClient>,
    observer: Arc<dyn BulkObserver>,
    metrics: Metrics,
    config: BulkProcessorConfig,
    execution_id: Arc<AtomicI64>,
) {
    let mut batch: Vec<Request> = Vec::new();
    let mut batch_bytes: i64 = 0;
    let cancel = CancellationToken::new();

    loop {
        tokio::select! {
            biased;
            Some(ack) = flush_rx.recv() => {
                if !batch.is_empty() {
                    commit_batch(&mut batch, &mut batch_bytes, &sink, &observer, &metrics, &cancel, &execution_id).await;
                }
                let _ = ack.send(());
            }
            maybe_req = async { shared_rx.lock().await.recv().await } => {
                match maybe_req {
                    Some(req) => {
                        batch_bytes += req.approx_size_bytes() as i64;
                        batch.push(req);
                        if commit_required(batch.len(), batch_bytes, &config) {
                            commit_batch(&mut batch, &mut batch_bytes, &sink, &observer, &metrics, &cancel, &execution_id).await;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            commit_batch(&mut batch, &mut batch_bytes, &sink, &observer, &metrics, &cancel, &execution_id).await;
                        }
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!(worker = index, "bulk worker stopped");
}

async fn commit_batch(
    batch: &mut Vec<Request>,
    batch_bytes: &mut i64,
    sink: &Arc<dyn SinkClient>,
    observer: &Arc<dyn BulkObserver>,
    metrics: &Metrics,
    cancel: &CancellationToken,
    execution_id: &Arc<AtomicI64>,
) {
    let requests = std::mem::take(batch);
    *batch_bytes = 0;
    let id = execution_id.fetch_add(1, Ordering::SeqCst) + 1;

    observer.before(id, &requests);

    let started = std::time::Instant::now();
    let result = commit_with_retry(sink.as_ref(), cancel, &requests, id).await;
    metrics.observe_commit_latency(sink.name(), started.elapsed().as_millis() as f64);

    match &result {
        Ok(()) => metrics.record_processed(sink.name(), requests.len() as u64),
        Err(err) => tracing::error!(execution_id = id, sink = sink.name(), error = %err, "bulk commit failed after retries"),
    }

    observer.after(id, &requests, &result);
}

async fn commit_with_retry(
    sink: &dyn SinkClient,
    cancel: &CancellationToken,
    requests: &[Request],
    execution_id: i64,
) -> Result<()> {
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_multiplier(1.5)
        .with_max_interval(Duration::from_secs(60))
        .build();

    let mut attempt = 0u32;
    loop {
        match sink.commit(cancel, requests).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < 3 && err.is_retryable_commit_error() => {
                attempt += 1;
                let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                tracing::warn!(
                    execution_id,
                    attempt,
                    error = %err,
                    "bulk processor commit failed, retrying in {:?}",
                    wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::error::EngineError;
    use cdc_core::model::DocumentId;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    fn sample_request() -> Request {
        Request {
            namespace: "d.c".to_string(),
            id: DocumentId(bson::oid::ObjectId::new()),
            doc: BTreeMap::new(),
        }
    }

    struct CountingSink {
        calls: AtomicUsize,
        received: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait::async_trait]
    impl SinkClient for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }
        fn embed_doc(&self) -> bool {
            false
        }
        async fn commit(&self, _cancel: &CancellationToken, requests: &[Request]) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first_n {
                return Err(EngineError::TransientCommit {
                    sink: "counting".to_string(),
                    source: anyhow::anyhow!("simulated failure"),
                });
            }
            self.received.fetch_add(requests.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingObserver {
        after_calls: StdMutex<Vec<(i64, bool)>>,
    }
    impl BulkObserver for RecordingObserver {
        fn after(&self, execution_id: i64, _requests: &[Request], result: &Result<()>) {
            self.after_calls
                .lock()
                .unwrap()
                .push((execution_id, result.is_ok()));
        }
    }

    #[tokio::test]
    async fn every_enqueued_request_is_delivered_exactly_once_by_quiescence() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            fail_first_n: 0,
        });
        let processor = BulkProcessor::start(
            sink.clone(),
            Arc::new(NoopObserver),
            Metrics::new(),
            BulkProcessorConfig {
                workers: 1,
                batch_actions: 10,
                batch_bytes: -1,
                flush_interval: Duration::ZERO,
            },
        );
        for _ in 0..10 {
            processor.add(sample_request()).await.unwrap();
        }
        processor.close().await;
        assert_eq!(sink.received.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn batch_never_exceeds_the_configured_size() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            fail_first_n: 0,
        });
        let processor = BulkProcessor::start(
            sink.clone(),
            Arc::new(NoopObserver),
            Metrics::new(),
            BulkProcessorConfig {
                workers: 1,
                batch_actions: 1,
                batch_bytes: -1,
                flush_interval: Duration::ZERO,
            },
        );
        for _ in 0..5 {
            processor.add(sample_request()).await.unwrap();
        }
        processor.close().await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
        assert_eq!(sink.received.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn retries_until_success_then_reports_via_after() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            fail_first_n: 2,
        });
        let observer = Arc::new(RecordingObserver {
            after_calls: StdMutex::new(Vec::new()),
        });
        let processor = BulkProcessor::start(
            sink.clone(),
            observer.clone(),
            Metrics::new(),
            BulkProcessorConfig {
                workers: 1,
                batch_actions: 10,
                batch_bytes: -1,
                flush_interval: Duration::ZERO,
            },
        );
        for _ in 0..10 {
            processor.add(sample_request()).await.unwrap();
        }
        processor.close().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        let calls = observer.after_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_the_final_error() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            fail_first_n: usize::MAX,
        });
        let observer = Arc::new(RecordingObserver {
            after_calls: StdMutex::new(Vec::new()),
        });
        let processor = BulkProcessor::start(
            sink.clone(),
            observer.clone(),
            Metrics::new(),
            BulkProcessorConfig {
                workers: 1,
                batch_actions: 10,
                batch_bytes: -1,
                flush_interval: Duration::ZERO,
            },
        );
        for _ in 0..10 {
            processor.add(sample_request()).await.unwrap();
        }
        processor.close().await;

        // initial attempt + 3 retries = 4 total attempts
        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
        let calls = observer.after_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_on_tick_commits_a_partial_batch() {
        let sink = Arc::new(CountingSink {
            calls: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            fail_first_n: 0,
        });
        let processor = BulkProcessor::start(
            sink.clone(),
            Arc::new(NoopObserver),
            Metrics::new(),
            BulkProcessorConfig {
                workers: 1,
                batch_actions: 10,
                batch_bytes: -1,
                flush_interval: StdDuration::from_millis(100),
            },
        );
        for _ in 0..3 {
            processor.add(sample_request()).await.unwrap();
        }
        tokio::time::advance(StdDuration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert_eq!(sink.received.load(Ordering::SeqCst), 3);
        processor.close().await;
    }
}
