//! The relay engine: wiring, lifecycle and shutdown coordination.
//!
//! A fixed pipeline of worker tasks, one per stage:
//!
//! ```text
//! issue() ──► Batcher ──► Router ──► Channel workers ──► StreamBackend
//!                                                            │ events
//!                                                    ┌───────▼───────┐
//!                                                    │  Classifier   │
//!                                                    └──┬─────────┬──┘
//!                                              first lane│         │intermediate lane
//!                                            ┌───────────▼──┐  ┌───▼──────────────┐
//!                                            │First gatherer│  │Interm. gatherer  │
//!                                            └───────────┬──┘  └───┬──────────────┘
//!                                                        └────┬────┘
//!                                                     ┌───────▼───────┐
//!                                                     │   Reporter    │──► CompletionSink
//!                                                     └───────────────┘
//! ```
//!
//! Shutdown is cooperative drain-to-completion: `flush` pushes a sentinel
//! through the batcher; the sentinel fans out to every channel worker;
//! event-queue closure drains the classifier; lane closure drains the
//! gatherers; completion-queue closure drains the reporter. `stop` joins
//! every worker. No in-flight request is cancelled mid-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::StreamBackend;
use crate::batcher::{self, BatcherHandle};
use crate::classifier::spawn_classifier;
use crate::config::EngineConfig;
use crate::dispatch::{spawn_channel_worker, spawn_router};
use crate::error::{EngineError, ErrorSink, ProtocolError};
use crate::gatherer::{spawn_first_gatherer, spawn_intermediate_gatherer, InFlightTable};
use crate::metrics::EngineMetrics;
use crate::queue;
use crate::reporter::{spawn_reporter, CompletionSink};
use crate::types::Query;

/// The dispatch / batching / reassembly engine.
pub struct Engine {
    batcher: BatcherHandle,
    accepting: AtomicBool,
    table: Arc<InFlightTable>,
    metrics: Arc<EngineMetrics>,
    errors: ErrorSink,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validate `config`, spawn every pipeline worker and return the
    /// running engine. Must be called within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        backend: Arc<dyn StreamBackend>,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let errors = ErrorSink::new();
        let table = Arc::new(InFlightTable::new());
        let mut workers = Vec::with_capacity(config.num_channels + 5);

        // Stages are built sink-first so each one's input queue exists
        // before its producer starts.
        let (completion_tx, completion_rx) = queue::bounded(config.queue_depth);
        workers.push(spawn_reporter(completion_rx, sink));

        let (first_tx, first_rx) = queue::bounded(config.queue_depth);
        let (interm_tx, interm_rx) = queue::bounded(config.queue_depth);
        workers.push(spawn_first_gatherer(
            first_rx,
            table.clone(),
            completion_tx.clone(),
            errors.clone(),
            metrics.clone(),
            config.eos_token,
        ));
        workers.push(spawn_intermediate_gatherer(
            interm_rx,
            table.clone(),
            completion_tx,
            errors.clone(),
            metrics.clone(),
        ));

        let (event_tx, event_rx) = queue::bounded(config.queue_depth);
        workers.push(spawn_classifier(
            event_rx,
            table.clone(),
            first_tx,
            interm_tx,
            metrics.clone(),
        ));

        let mut channel_txs = Vec::with_capacity(config.num_channels);
        for channel in 0..config.num_channels {
            let (tx, rx) = queue::bounded(config.queue_depth);
            channel_txs.push(tx);
            workers.push(spawn_channel_worker(
                channel,
                rx,
                backend.clone(),
                event_tx.clone(),
            ));
        }
        // The channel workers and the streams they spawn now hold the only
        // event senders; the classifier stops once all of them are done.
        drop(event_tx);

        let (router_tx, router_rx) = queue::bounded(config.queue_depth);
        workers.push(spawn_router(router_rx, channel_txs, metrics.clone()));

        let (batcher, batcher_task) = batcher::spawn(
            config.max_batch_size,
            config.max_wait,
            router_tx,
            metrics.clone(),
        );
        workers.push(batcher_task);

        info!(
            max_batch_size = config.max_batch_size,
            max_wait_ms = config.max_wait.as_millis() as u64,
            num_channels = config.num_channels,
            "engine started"
        );

        Ok(Self {
            batcher,
            accepting: AtomicBool::new(true),
            table,
            metrics,
            errors,
            workers,
        })
    }

    /// Hand a batch of queries to the engine. Never blocks the caller.
    ///
    /// Returns [`EngineError::ShutdownInProgress`] once `flush` has been
    /// called — issuing after flush is a usage error.
    pub fn issue(&self, queries: Vec<Query>) -> Result<(), EngineError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::ShutdownInProgress);
        }
        if queries.is_empty() {
            return Ok(());
        }
        self.metrics.record_submitted(queries.len());
        self.batcher
            .submit(queries)
            .map_err(|_| EngineError::Closed("batcher"))
    }

    /// Signal that no more queries will be issued and start the drain.
    /// Idempotent.
    pub fn flush(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            debug!("flush requested, draining pipeline");
            let _ = self.batcher.shutdown();
        }
    }

    /// Drain the pipeline and block until every worker has joined.
    ///
    /// Calls `flush` if the caller has not; all queued work is completed,
    /// nothing is dropped. Idempotent: a second call returns immediately.
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        self.flush();
        let results = join_all(self.workers.drain(..)).await;
        for result in results {
            result.map_err(|e| EngineError::Join(e.to_string()))?;
        }
        let snapshot = self.metrics.snapshot();
        info!(
            completions = snapshot.completions,
            failures = snapshot.failures,
            protocol_errors = snapshot.protocol_errors,
            "engine stopped"
        );
        Ok(())
    }

    /// Engine counters.
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Protocol violations observed so far.
    pub fn protocol_errors(&self) -> Vec<ProtocolError> {
        self.errors.snapshot()
    }

    /// Samples currently holding an accumulator.
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::types::{SampleId, Token};
    use bytes::Bytes;
    use std::time::Duration;

    struct NullSink;

    impl CompletionSink for NullSink {
        fn on_first_token(&self, _: SampleId, _: Token) {}
        fn on_complete(&self, _: SampleId, _: &[Token]) {}
        fn on_error(&self, _: SampleId, _: &str) {}
    }

    fn engine(config: EngineConfig) -> Engine {
        let backend = Arc::new(SimulatedBackend::new(2, Duration::ZERO));
        Engine::start(config, backend, Arc::new(NullSink)).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop_idle() {
        let mut engine = engine(EngineConfig::low_latency());
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.num_channels = 0;
        let backend = Arc::new(SimulatedBackend::new(2, Duration::ZERO));
        let result = Engine::start(config, backend, Arc::new(NullSink));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_issue_after_flush_is_usage_error() {
        let mut engine = engine(EngineConfig::low_latency());
        engine.flush();

        let result = engine.issue(vec![Query::new(1, 0, Bytes::new())]);
        assert!(matches!(result, Err(EngineError::ShutdownInProgress)));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let mut engine = engine(EngineConfig::low_latency());
        engine.flush();
        engine.flush();
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut engine = engine(EngineConfig::low_latency());
        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_issue_is_noop() {
        let mut engine = engine(EngineConfig::low_latency());
        engine.issue(Vec::new()).unwrap();
        assert_eq!(
            engine
                .metrics()
                .queries_submitted
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
        engine.stop().await.unwrap();
    }
}
