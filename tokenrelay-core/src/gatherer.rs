//! Per-sample accumulation state machines.
//!
//! Two single-threaded workers own disjoint operations on the shared
//! in-flight table. The first-token worker handles stream admission records
//! and the degenerate single-token completion; the intermediate worker
//! appends continuation tokens and finalizes streams. Entry creation happens
//! at classification time on the first-token path (see
//! [`classifier`](crate::classifier)), so a continuation can never observe
//! the absent state for an admitted sample.
//!
//! Conceptually every sample moves through the tagged states
//! `Unseen -> Accumulating -> Finalized`. `Accumulating` is a live table
//! entry; `Finalized` is represented by entry removal so memory stays
//! bounded by the number of in-flight samples. Events that reach a gatherer
//! in a state it cannot accept are protocol violations: fatal for the
//! sample, surfaced on the error sink, never retried and never silently
//! dropped — and isolated, so other in-flight samples are unaffected.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{ErrorSink, ProtocolError};
use crate::metrics::EngineMetrics;
use crate::queue::{QueueRx, QueueTx};
use crate::types::{CompletionRecord, SampleId, StreamEvent, Token};

/// The mutable, per-in-flight-sample ordered token buffers.
///
/// An entry exists iff a first token for the sample has been admitted and
/// no final event has been consumed. The classifier creates entries on the
/// first-token path; the intermediate gatherer appends and finalizes; the
/// first-token gatherer removes only on the degenerate single-token path.
/// No other code mutates the table.
#[derive(Debug, Default)]
pub struct InFlightTable {
    entries: DashMap<SampleId, Vec<Token>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership view used by the classifier. O(1), read-only.
    pub fn contains(&self, sample_id: SampleId) -> bool {
        self.entries.contains_key(&sample_id)
    }

    /// Number of samples currently accumulating.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create the accumulator for a newly admitted stream.
    pub(crate) fn admit(&self, sample_id: SampleId, first_token: Token) {
        self.entries.insert(sample_id, vec![first_token]);
    }

    /// Append a continuation token to a live accumulator.
    pub(crate) fn append(&self, sample_id: SampleId, token: Token) -> Result<(), ProtocolError> {
        match self.entries.get_mut(&sample_id) {
            Some(mut tokens) => {
                tokens.push(token);
                Ok(())
            }
            None => Err(ProtocolError::MissingFirst { sample_id }),
        }
    }

    /// Remove the accumulator and return the ordered tokens.
    pub(crate) fn finalize(&self, sample_id: SampleId) -> Result<Vec<Token>, ProtocolError> {
        self.entries
            .remove(&sample_id)
            .map(|(_, tokens)| tokens)
            .ok_or(ProtocolError::MissingFirst { sample_id })
    }

    /// Remove the accumulator without completing (transport failure).
    /// Returns whether an accumulator existed.
    pub(crate) fn abandon(&self, sample_id: SampleId) -> bool {
        self.entries.remove(&sample_id).is_some()
    }
}

/// State transition for the first-token gatherer.
///
/// `Unseen -> Accumulating` on a first token: the admission record is
/// emitted, and a single-token response additionally takes the degenerate
/// one-hop path straight to `Finalized`. A continuation on this lane means
/// no first token was ever admitted for the sample.
fn first_transition(
    table: &InFlightTable,
    eos_token: Option<Token>,
    event: StreamEvent,
) -> Result<Vec<CompletionRecord>, ProtocolError> {
    match event {
        StreamEvent::First { sample_id, token, is_final } => {
            let mut records = vec![CompletionRecord::FirstToken { sample_id, token }];
            if is_final {
                let mut tokens = table.finalize(sample_id)?;
                if let Some(eos) = eos_token {
                    tokens.push(eos);
                }
                records.push(CompletionRecord::Complete { sample_id, tokens });
            }
            Ok(records)
        }
        StreamEvent::Continuation { sample_id, .. } => {
            Err(ProtocolError::MissingFirst { sample_id })
        }
        StreamEvent::Error { sample_id, cause } => {
            Ok(vec![CompletionRecord::Failed { sample_id, cause }])
        }
    }
}

/// State transition for the intermediate-token gatherer.
///
/// `Accumulating -> Accumulating` on a non-final continuation,
/// `Accumulating -> Finalized` on a final one. A first token on this lane
/// means the sample already has a live accumulator.
fn intermediate_transition(
    table: &InFlightTable,
    event: StreamEvent,
) -> Result<Option<CompletionRecord>, ProtocolError> {
    match event {
        StreamEvent::Continuation { sample_id, token, is_final: false } => {
            table.append(sample_id, token)?;
            Ok(None)
        }
        StreamEvent::Continuation { sample_id, token, is_final: true } => {
            table.append(sample_id, token)?;
            let tokens = table.finalize(sample_id)?;
            Ok(Some(CompletionRecord::Complete { sample_id, tokens }))
        }
        StreamEvent::First { sample_id, .. } => {
            Err(ProtocolError::DuplicateFirst { sample_id })
        }
        StreamEvent::Error { sample_id, cause } => {
            table.abandon(sample_id);
            Ok(Some(CompletionRecord::Failed { sample_id, cause }))
        }
    }
}

/// Spawn the first-token gatherer worker.
pub(crate) fn spawn_first_gatherer(
    mut rx: QueueRx<StreamEvent>,
    table: Arc<InFlightTable>,
    out: QueueTx<CompletionRecord>,
    errors: ErrorSink,
    metrics: Arc<EngineMetrics>,
    eos_token: Option<Token>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let sample_id = event.sample_id();
            match first_transition(&table, eos_token, event) {
                Ok(records) => {
                    for record in records {
                        match &record {
                            CompletionRecord::FirstToken { .. } => {
                                metrics.record_token();
                                metrics.record_first_token();
                            }
                            CompletionRecord::Complete { .. } => metrics.record_completion(),
                            CompletionRecord::Failed { .. } => metrics.record_failure(false),
                        }
                        if out.send(record).await.is_err() {
                            debug!("completion queue closed, first gatherer stopping");
                            return;
                        }
                    }
                }
                Err(violation) => {
                    error!(sample_id, %violation, "protocol violation on first-token lane");
                    metrics.record_protocol_error();
                    errors.record(violation);
                }
            }
        }
        debug!("first-token gatherer drained");
    })
}

/// Spawn the intermediate-token gatherer worker.
pub(crate) fn spawn_intermediate_gatherer(
    mut rx: QueueRx<StreamEvent>,
    table: Arc<InFlightTable>,
    out: QueueTx<CompletionRecord>,
    errors: ErrorSink,
    metrics: Arc<EngineMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let sample_id = event.sample_id();
            let is_continuation = matches!(event, StreamEvent::Continuation { .. });
            match intermediate_transition(&table, event) {
                Ok(maybe_record) => {
                    if is_continuation {
                        metrics.record_token();
                    }
                    let Some(record) = maybe_record else {
                        trace!(sample_id, "token appended");
                        continue;
                    };
                    match &record {
                        CompletionRecord::Complete { tokens, .. } => {
                            debug!(sample_id, tokens = tokens.len(), "sample finalized");
                            metrics.record_completion();
                        }
                        CompletionRecord::Failed { .. } => metrics.record_failure(true),
                        CompletionRecord::FirstToken { .. } => {}
                    }
                    if out.send(record).await.is_err() {
                        debug!("completion queue closed, intermediate gatherer stopping");
                        return;
                    }
                }
                Err(violation) => {
                    error!(sample_id, %violation, "protocol violation on intermediate lane");
                    metrics.record_protocol_error();
                    errors.record(violation);
                }
            }
        }
        debug!("intermediate-token gatherer drained");
    })
}
