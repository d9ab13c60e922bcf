//! Metrics for the relay engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for monitoring engine behaviour.
///
/// All counters use relaxed atomics; they are observability data, not
/// correctness-critical state.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Queries accepted by `issue`.
    pub queries_submitted: AtomicU64,

    /// Batches released by the adaptive batcher.
    pub batches_released: AtomicU64,

    /// Total queries across all released batches (for batch size averaging).
    pub batched_queries: AtomicU64,

    /// Queries handed to a backend channel by the dispatch router.
    pub queries_dispatched: AtomicU64,

    /// First-token completion records produced.
    pub first_tokens: AtomicU64,

    /// Full-sample completion records produced.
    pub completions: AtomicU64,

    /// Failure records produced (transport errors).
    pub failures: AtomicU64,

    /// Protocol violations observed by the gatherers.
    pub protocol_errors: AtomicU64,

    /// Tokens consumed across all streams.
    pub tokens_streamed: AtomicU64,

    /// Samples currently holding an accumulator.
    pub in_flight: AtomicU64,

    /// Maximum in-flight samples observed.
    pub max_in_flight: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self, count: usize) {
        self.queries_submitted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, size: usize) {
        self.batches_released.fetch_add(1, Ordering::Relaxed);
        self.batched_queries
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.queries_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample entering the in-flight table.
    pub(crate) fn record_admitted(&self) {
        let live = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        let mut current_max = self.max_in_flight.load(Ordering::Relaxed);
        while live > current_max {
            match self.max_in_flight.compare_exchange_weak(
                current_max,
                live,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    pub(crate) fn record_token(&self) {
        self.tokens_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_first_token(&self) {
        self.first_tokens.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample leaving the in-flight table with a full completion.
    pub(crate) fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        self.dec_in_flight();
    }

    /// Record a failed sample. `was_in_flight` is set when an accumulator
    /// existed and was torn down.
    pub(crate) fn record_failure(&self, was_in_flight: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if was_in_flight {
            self.dec_in_flight();
        }
    }

    /// The gauge saturates at zero: a backend that emits events after
    /// finality must not wrap it.
    fn dec_in_flight(&self) {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        while current > 0 {
            match self.in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current = x,
            }
        }
    }

    pub(crate) fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Average released batch size.
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_released.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let queries = self.batched_queries.load(Ordering::Relaxed);
        queries as f64 / batches as f64
    }

    /// Samples currently in flight.
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_submitted: self.queries_submitted.load(Ordering::Relaxed),
            batches_released: self.batches_released.load(Ordering::Relaxed),
            queries_dispatched: self.queries_dispatched.load(Ordering::Relaxed),
            first_tokens: self.first_tokens.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            tokens_streamed: self.tokens_streamed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Snapshot of the engine counters at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub queries_submitted: u64,
    pub batches_released: u64,
    pub queries_dispatched: u64,
    pub first_tokens: u64,
    pub completions: u64,
    pub failures: u64,
    pub protocol_errors: u64,
    pub tokens_streamed: u64,
    pub in_flight: u64,
    pub max_in_flight: u64,
    pub avg_batch_size: f64,
}
