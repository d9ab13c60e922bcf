//! Adaptive batcher: converts an unbounded arrival stream into bounded
//! batches without incurring unbounded latency.
//!
//! A batch is released when either the size threshold or the time threshold
//! is reached, whichever comes first. The size check takes precedence on
//! every loop iteration, so reaching `max_batch_size` mid-accumulation
//! flushes immediately; an elapsed window with nothing pending releases
//! nothing (no empty batches are ever emitted).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::metrics::EngineMetrics;
use crate::queue::{self, QueueClosed, QueueRx, QueueTx, TimedRecv, UnboundedQueueTx};
use crate::types::Query;

/// Input accepted by the batcher worker.
pub(crate) enum BatchInput {
    Submit(Vec<Query>),
    Shutdown,
}

/// Output released downstream to the dispatch router.
pub(crate) enum BatchOutput {
    Batch(Vec<Query>),
    Shutdown,
}

/// Submission handle held by the engine. `submit` never blocks the caller.
#[derive(Clone)]
pub(crate) struct BatcherHandle {
    tx: UnboundedQueueTx<BatchInput>,
}

impl BatcherHandle {
    pub(crate) fn submit(&self, queries: Vec<Query>) -> Result<(), QueueClosed> {
        self.tx.send(BatchInput::Submit(queries))
    }

    pub(crate) fn shutdown(&self) -> Result<(), QueueClosed> {
        self.tx.send(BatchInput::Shutdown)
    }
}

/// Spawn the batcher worker.
pub(crate) fn spawn(
    max_batch_size: usize,
    max_wait: Duration,
    out: QueueTx<BatchOutput>,
    metrics: Arc<EngineMetrics>,
) -> (BatcherHandle, JoinHandle<()>) {
    let (tx, rx) = queue::unbounded();
    let task = tokio::spawn(run(rx, max_batch_size, max_wait, out, metrics));
    (BatcherHandle { tx }, task)
}

async fn run(
    mut rx: QueueRx<BatchInput>,
    max_batch_size: usize,
    max_wait: Duration,
    out: QueueTx<BatchOutput>,
    metrics: Arc<EngineMetrics>,
) {
    let mut pending: VecDeque<Query> = VecDeque::new();
    let mut window_start = Instant::now();

    loop {
        // Size threshold first, on every iteration.
        while pending.len() >= max_batch_size {
            if release(&mut pending, max_batch_size, &out, &metrics).await.is_err() {
                warn!("batch output closed, batcher stopping");
                return;
            }
            window_start = Instant::now();
        }

        let remaining = max_wait
            .checked_sub(window_start.elapsed())
            .unwrap_or(Duration::ZERO);

        match rx.recv_timeout(remaining).await {
            TimedRecv::Received(BatchInput::Submit(queries)) => {
                trace!(count = queries.len(), "queries arrived");
                pending.extend(queries);
            }
            TimedRecv::Received(BatchInput::Shutdown) | TimedRecv::Closed => break,
            TimedRecv::TimedOut => {
                if !pending.is_empty() {
                    let size = pending.len().min(max_batch_size);
                    if release(&mut pending, size, &out, &metrics).await.is_err() {
                        warn!("batch output closed, batcher stopping");
                        return;
                    }
                }
                window_start = Instant::now();
            }
        }
    }

    // Sentinel received: flush the remainder, still honoring the size bound,
    // then propagate the sentinel.
    while !pending.is_empty() {
        let size = pending.len().min(max_batch_size);
        if release(&mut pending, size, &out, &metrics).await.is_err() {
            warn!("batch output closed during final flush");
            return;
        }
    }
    debug!("batcher flushed, forwarding shutdown");
    let _ = out.send(BatchOutput::Shutdown).await;
}

async fn release(
    pending: &mut VecDeque<Query>,
    size: usize,
    out: &QueueTx<BatchOutput>,
    metrics: &EngineMetrics,
) -> Result<(), QueueClosed> {
    let batch: Vec<Query> = pending.drain(..size).collect();
    debug!(size = batch.len(), backlog = pending.len(), "releasing batch");
    metrics.record_batch(batch.len());
    out.send(BatchOutput::Batch(batch)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleId;
    use bytes::Bytes;

    fn queries(ids: std::ops::Range<SampleId>) -> Vec<Query> {
        ids.map(|id| Query::new(id, id, Bytes::new())).collect()
    }

    fn ids(output: &BatchOutput) -> Vec<SampleId> {
        match output {
            BatchOutput::Batch(batch) => batch.iter().map(|q| q.id).collect(),
            BatchOutput::Shutdown => panic!("expected a batch"),
        }
    }

    fn harness(
        max_batch_size: usize,
        max_wait: Duration,
    ) -> (BatcherHandle, QueueRx<BatchOutput>, JoinHandle<()>) {
        let (out_tx, out_rx) = queue::bounded(16);
        let metrics = Arc::new(EngineMetrics::new());
        let (handle, task) = spawn(max_batch_size, max_wait, out_tx, metrics);
        (handle, out_rx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_releases_immediately() {
        let (handle, mut out, task) = harness(2, Duration::from_secs(1));

        handle.submit(queries(0..5)).unwrap();

        // Two full batches before the window can possibly elapse.
        assert_eq!(ids(&out.recv().await.unwrap()), vec![0, 1]);
        assert_eq!(ids(&out.recv().await.unwrap()), vec![2, 3]);

        // The leftover flushes on the window timeout.
        let started = Instant::now();
        assert_eq!(ids(&out.recv().await.unwrap()), vec![4]);
        assert!(started.elapsed() >= Duration::from_millis(900));

        handle.shutdown().unwrap();
        assert!(matches!(out.recv().await, Some(BatchOutput::Shutdown)));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_flushes_partial_batch() {
        let (handle, mut out, task) = harness(8, Duration::from_millis(100));

        handle.submit(queries(0..3)).unwrap();

        let started = Instant::now();
        assert_eq!(ids(&out.recv().await.unwrap()), vec![0, 1, 2]);
        // Released by the timer, not the size threshold.
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() <= Duration::from_millis(200));

        handle.shutdown().unwrap();
        assert!(matches!(out.recv().await, Some(BatchOutput::Shutdown)));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_empty_batches_on_idle_windows() {
        let (handle, mut out, task) = harness(4, Duration::from_millis(50));

        // Several idle windows pass; nothing may be released.
        let outcome = out.recv_timeout(Duration::from_millis(500)).await;
        assert!(matches!(outcome, TimedRecv::TimedOut));

        handle.shutdown().unwrap();
        assert!(matches!(out.recv().await, Some(BatchOutput::Shutdown)));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_below_threshold() {
        let (handle, mut out, task) = harness(10, Duration::from_secs(60));

        handle.submit(queries(0..3)).unwrap();
        handle.shutdown().unwrap();

        assert_eq!(ids(&out.recv().await.unwrap()), vec![0, 1, 2]);
        assert!(matches!(out.recv().await, Some(BatchOutput::Shutdown)));
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flush_honors_batch_bound() {
        let (handle, mut out, task) = harness(4, Duration::from_secs(60));

        handle.submit(queries(0..3)).unwrap();
        handle.submit(queries(3..10)).unwrap();
        handle.shutdown().unwrap();

        let mut sizes = Vec::new();
        loop {
            match out.recv().await.unwrap() {
                BatchOutput::Batch(batch) => {
                    assert!(batch.len() <= 4 && !batch.is_empty());
                    sizes.push(batch.len());
                }
                BatchOutput::Shutdown => break,
            }
        }
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_close_acts_as_sentinel() {
        let (handle, mut out, task) = harness(8, Duration::from_secs(60));

        handle.submit(queries(0..2)).unwrap();
        drop(handle);

        assert_eq!(ids(&out.recv().await.unwrap()), vec![0, 1]);
        assert!(matches!(out.recv().await, Some(BatchOutput::Shutdown)));
        task.await.unwrap();
    }
}
