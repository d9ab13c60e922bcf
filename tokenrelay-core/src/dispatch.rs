//! Round-robin dispatch across a fixed set of backend channels.
//!
//! The router decouples arrival order from backend assignment. It is
//! intentionally stateless round robin, not load-aware: channels are
//! homogeneous replicas of the same backend, so uniform service time is
//! assumed. A full channel queue blocks the router (backpressure, not an
//! error).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::backend::{EventSender, StreamBackend};
use crate::batcher::BatchOutput;
use crate::metrics::EngineMetrics;
use crate::queue::{QueueRx, QueueTx};
use crate::types::{ChannelId, Query, StreamEvent};

/// Input accepted by a channel worker.
pub(crate) enum ChannelInput {
    Query(Query),
    Shutdown,
}

/// Spawn the router worker.
///
/// The next-channel cursor is owned by the worker itself; it is never
/// touched elsewhere, so no atomic is needed.
pub(crate) fn spawn_router(
    mut rx: QueueRx<BatchOutput>,
    channels: Vec<QueueTx<ChannelInput>>,
    metrics: Arc<EngineMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor: usize = 0;

        loop {
            match rx.recv().await {
                Some(BatchOutput::Batch(batch)) => {
                    trace!(size = batch.len(), "routing batch");
                    for query in batch {
                        metrics.record_dispatched();
                        if channels[cursor].send(ChannelInput::Query(query)).await.is_err() {
                            warn!(channel = cursor, "channel queue closed, router stopping");
                            return;
                        }
                        cursor = (cursor + 1) % channels.len();
                    }
                }
                Some(BatchOutput::Shutdown) | None => break,
            }
        }

        debug!("router forwarding shutdown to all channels");
        for (channel, tx) in channels.iter().enumerate() {
            if tx.send(ChannelInput::Shutdown).await.is_err() {
                warn!(channel, "channel queue already closed");
            }
        }
    })
}

/// Spawn one channel worker.
///
/// The worker issues queries to its backend channel in queue order. On the
/// shutdown sentinel it stops issuing and drops its event sender clone; the
/// classifier's input closes once every worker is done and every in-flight
/// stream has finished.
pub(crate) fn spawn_channel_worker(
    channel: ChannelId,
    mut rx: QueueRx<ChannelInput>,
    backend: Arc<dyn StreamBackend>,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(input) = rx.recv().await {
            match input {
                ChannelInput::Query(query) => {
                    let sample_id = query.id;
                    trace!(channel, sample_id, "issuing query");
                    if let Err(error) = backend.issue(channel, query, events.clone()).await {
                        warn!(channel, sample_id, %error, "backend refused query");
                        let failed = StreamEvent::Error {
                            sample_id,
                            cause: error.to_string(),
                        };
                        if events.send(failed).await.is_err() {
                            return;
                        }
                    }
                }
                ChannelInput::Shutdown => break,
            }
        }
        debug!(channel, "channel worker stopped");
    })
}
