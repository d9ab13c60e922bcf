//! Completion reporter: fan-in point between the gatherers and the load
//! generator's completion interface.
//!
//! Pure translation, no buffering beyond the bounded input queue, and no
//! reordering: records are forwarded strictly in the order the gatherers
//! produced them.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::queue::QueueRx;
use crate::types::{CompletionRecord, SampleId, Token};

/// The load generator's completion interface.
///
/// Implementations must be cheap: the reporter calls them inline on its
/// worker, so a slow sink backpressures the whole pipeline.
pub trait CompletionSink: Send + Sync + 'static {
    /// The first token of a sample became available.
    fn on_first_token(&self, sample_id: SampleId, token: Token);

    /// A sample's stream finished with the full ordered response.
    fn on_complete(&self, sample_id: SampleId, tokens: &[Token]);

    /// A sample failed; distinct from completion so the load generator can
    /// tell "answered" from "errored".
    fn on_error(&self, sample_id: SampleId, cause: &str);
}

/// Spawn the reporter worker. Terminates once the completion queue is
/// closed and drained.
pub(crate) fn spawn_reporter(
    mut rx: QueueRx<CompletionRecord>,
    sink: Arc<dyn CompletionSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            trace!(sample_id = record.sample_id(), "forwarding completion record");
            match record {
                CompletionRecord::FirstToken { sample_id, token } => {
                    sink.on_first_token(sample_id, token);
                }
                CompletionRecord::Complete { sample_id, tokens } => {
                    sink.on_complete(sample_id, &tokens);
                }
                CompletionRecord::Failed { sample_id, cause } => {
                    sink.on_error(sample_id, &cause);
                }
            }
        }
        debug!("completion queue drained, reporter stopping");
    })
}
