//! Stream callback classifier.
//!
//! Events arrive out-of-band from every backend channel on one merged
//! queue. The classifier decides, per event, whether the sample is new or
//! already streaming, and routes it to the matching gatherer lane. The
//! membership test is the accumulator-existence view of the in-flight
//! table: O(1) and lock-free on the read side, safe because the classifier
//! itself is the only writer that creates entries and it is single-threaded
//! and deterministic — a given sample can never be concurrently classified
//! to both lanes.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::gatherer::InFlightTable;
use crate::metrics::EngineMetrics;
use crate::queue::{QueueRx, QueueTx};
use crate::types::StreamEvent;

/// The gatherer lane an event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    /// Sample has no live accumulator.
    First,
    /// Sample is currently accumulating.
    Intermediate,
}

/// Route an event on the accumulator-existence view.
pub(crate) fn classify(table: &InFlightTable, event: &StreamEvent) -> Lane {
    if table.contains(event.sample_id()) {
        Lane::Intermediate
    } else {
        Lane::First
    }
}

/// Spawn the classifier worker.
///
/// Terminates when the event queue closes, i.e. when every channel worker
/// has stopped and every in-flight backend stream has finished. Dropping
/// the lane senders on return is what lets the gatherers drain and stop.
pub(crate) fn spawn_classifier(
    mut events: QueueRx<StreamEvent>,
    table: Arc<InFlightTable>,
    first_lane: QueueTx<StreamEvent>,
    intermediate_lane: QueueTx<StreamEvent>,
    metrics: Arc<EngineMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match classify(&table, &event) {
                Lane::First => {
                    // Admit the stream before routing, so a continuation
                    // arriving next can never observe the absent state.
                    if let StreamEvent::First { sample_id, token, .. } = &event {
                        table.admit(*sample_id, *token);
                        metrics.record_admitted();
                        trace!(sample_id, "sample admitted");
                    }
                    if first_lane.send(event).await.is_err() {
                        warn!("first-token lane closed, classifier stopping");
                        return;
                    }
                }
                Lane::Intermediate => {
                    if intermediate_lane.send(event).await.is_err() {
                        warn!("intermediate lane closed, classifier stopping");
                        return;
                    }
                }
            }
        }
        debug!("event queue closed, classifier stopping");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleId;

    fn first(sample_id: SampleId) -> StreamEvent {
        StreamEvent::First { sample_id, token: 1, is_final: false }
    }

    fn cont(sample_id: SampleId) -> StreamEvent {
        StreamEvent::Continuation { sample_id, token: 2, is_final: false }
    }

    #[test]
    fn test_unseen_sample_routes_to_first_lane() {
        let table = InFlightTable::new();
        assert_eq!(classify(&table, &first(1)), Lane::First);
        assert_eq!(classify(&table, &cont(1)), Lane::First);
    }

    #[test]
    fn test_accumulating_sample_routes_to_intermediate_lane() {
        let table = InFlightTable::new();
        table.admit(1, 10);

        assert_eq!(classify(&table, &cont(1)), Lane::Intermediate);
        // A duplicate first for a live sample also lands on the
        // intermediate lane, where it is surfaced as a violation.
        assert_eq!(classify(&table, &first(1)), Lane::Intermediate);
    }

    #[test]
    fn test_finalized_sample_routes_to_first_lane_again() {
        let table = InFlightTable::new();
        table.admit(1, 10);
        table.finalize(1).unwrap();

        // Late events after finality look like unknown samples; the
        // first-token gatherer raises the violation.
        assert_eq!(classify(&table, &cont(1)), Lane::First);
    }

    #[tokio::test]
    async fn test_classifier_worker_admits_and_routes() {
        let (event_tx, event_rx) = crate::queue::bounded(16);
        let (first_tx, mut first_rx) = crate::queue::bounded(16);
        let (interm_tx, mut interm_rx) = crate::queue::bounded(16);
        let table = Arc::new(InFlightTable::new());
        let metrics = Arc::new(EngineMetrics::new());

        let worker = spawn_classifier(
            event_rx,
            table.clone(),
            first_tx,
            interm_tx,
            metrics.clone(),
        );

        event_tx.send(first(9)).await.unwrap();
        event_tx
            .send(StreamEvent::Continuation { sample_id: 9, token: 2, is_final: true })
            .await
            .unwrap();
        drop(event_tx);
        worker.await.unwrap();

        assert!(matches!(
            first_rx.recv().await,
            Some(StreamEvent::First { sample_id: 9, .. })
        ));
        assert!(matches!(
            interm_rx.recv().await,
            Some(StreamEvent::Continuation { sample_id: 9, .. })
        ));
        // Lanes closed once the worker returned.
        assert_eq!(first_rx.recv().await, None);
        assert_eq!(interm_rx.recv().await, None);

        // The entry was created at classification time.
        assert!(table.contains(9));
        assert_eq!(metrics.in_flight_count(), 1);
    }
}
