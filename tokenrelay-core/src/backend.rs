//! Backend client seam.
//!
//! The wire protocol client that talks to a real inference backend is an
//! external collaborator; the engine only depends on the [`StreamBackend`]
//! trait. [`SimulatedBackend`] is the in-process implementation used by the
//! test suite and the CLI's synthetic sessions.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::BackendError;
use crate::queue::QueueTx;
use crate::types::{ChannelId, Query, SampleId, StreamEvent, Token};

/// Sender on which a backend delivers [`StreamEvent`]s for issued queries.
pub type EventSender = QueueTx<StreamEvent>;

/// A client for one inference backend with `N` homogeneous channels.
///
/// `issue` returns once the query has been accepted; response events arrive
/// asynchronously on `events`, zero or more per query, terminated by exactly
/// one event with `is_final` set (or a single `Error`). Events for a single
/// sample arrive in program order relative to each other; cross-sample
/// interleaving is unordered.
#[async_trait]
pub trait StreamBackend: Send + Sync + 'static {
    async fn issue(
        &self,
        channel: ChannelId,
        query: Query,
        events: EventSender,
    ) -> Result<(), BackendError>;
}

/// In-process backend that synthesizes token streams.
///
/// Token values are a deterministic function of (sample, position) so tests
/// can assert reassembly order without tracking state.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    /// Tokens generated per sample (including the first).
    tokens_per_sample: usize,
    /// Delay between consecutive tokens of one stream.
    inter_token_delay: Duration,
    /// Respond one-shot (single final token) for every Nth sample id.
    single_token_every: Option<u64>,
    /// Fail every Nth sample id after its first token.
    fail_every: Option<u64>,
    /// Reject every Nth sample id at issue time.
    reject_every: Option<u64>,
}

impl SimulatedBackend {
    pub fn new(tokens_per_sample: usize, inter_token_delay: Duration) -> Self {
        Self {
            tokens_per_sample: tokens_per_sample.max(1),
            inter_token_delay,
            single_token_every: None,
            fail_every: None,
            reject_every: None,
        }
    }

    /// Respond with a single final token for sample ids divisible by `n`.
    pub fn with_single_token_every(mut self, n: u64) -> Self {
        self.single_token_every = Some(n.max(1));
        self
    }

    /// Emit a transport error after the first token for sample ids
    /// divisible by `n`.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Reject at issue time for sample ids divisible by `n`.
    pub fn with_reject_every(mut self, n: u64) -> Self {
        self.reject_every = Some(n.max(1));
        self
    }

    /// The token this backend produces at `index` of `sample_id`'s stream.
    pub fn token_at(sample_id: SampleId, index: usize) -> Token {
        (sample_id as Token)
            .wrapping_mul(1_000)
            .wrapping_add(index as Token)
    }

    fn stream_len(&self, sample_id: SampleId) -> usize {
        match self.single_token_every {
            Some(n) if sample_id % n == 0 => 1,
            _ => self.tokens_per_sample,
        }
    }

    fn fails(&self, sample_id: SampleId) -> bool {
        matches!(self.fail_every, Some(n) if sample_id % n == 0)
    }
}

#[async_trait]
impl StreamBackend for SimulatedBackend {
    async fn issue(
        &self,
        channel: ChannelId,
        query: Query,
        events: EventSender,
    ) -> Result<(), BackendError> {
        let sample_id = query.id;

        if let Some(n) = self.reject_every {
            if sample_id % n == 0 {
                return Err(BackendError::Rejected {
                    channel,
                    sample_id,
                    message: "injected rejection".to_string(),
                });
            }
        }

        let total = self.stream_len(sample_id);
        let fails = self.fails(sample_id);
        let delay = self.inter_token_delay;
        debug!(channel, sample_id, total, "simulated stream starting");

        tokio::spawn(async move {
            let first = StreamEvent::First {
                sample_id,
                token: Self::token_at(sample_id, 0),
                is_final: total == 1 && !fails,
            };
            if events.send(first).await.is_err() {
                return;
            }

            if fails {
                let _ = events
                    .send(StreamEvent::Error {
                        sample_id,
                        cause: "injected transport failure".to_string(),
                    })
                    .await;
                return;
            }

            for index in 1..total {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let event = StreamEvent::Continuation {
                    sample_id,
                    token: Self::token_at(sample_id, index),
                    is_final: index == total - 1,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            trace!(sample_id, "simulated stream finished");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use bytes::Bytes;

    fn query(id: SampleId) -> Query {
        Query::new(id, id, Bytes::from_static(b"payload"))
    }

    #[tokio::test]
    async fn test_streaming_sample_event_sequence() {
        let backend = SimulatedBackend::new(3, Duration::ZERO);
        let (tx, mut rx) = queue::bounded(16);

        backend.issue(0, query(1), tx).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::First {
                sample_id: 1,
                token: SimulatedBackend::token_at(1, 0),
                is_final: false
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Continuation {
                sample_id: 1,
                token: SimulatedBackend::token_at(1, 1),
                is_final: false
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Continuation {
                sample_id: 1,
                token: SimulatedBackend::token_at(1, 2),
                is_final: true
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_single_token_sample_is_final_on_first() {
        let backend = SimulatedBackend::new(8, Duration::ZERO).with_single_token_every(1);
        let (tx, mut rx) = queue::bounded(16);

        backend.issue(0, query(5), tx).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::First {
                sample_id: 5,
                token: SimulatedBackend::token_at(5, 0),
                is_final: true
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_injected_failure_after_first_token() {
        let backend = SimulatedBackend::new(4, Duration::ZERO).with_fail_every(1);
        let (tx, mut rx) = queue::bounded(16);

        backend.issue(0, query(2), tx).await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(StreamEvent::First { sample_id: 2, is_final: false, .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(StreamEvent::Error { sample_id: 2, .. })
        ));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_injected_rejection() {
        let backend = SimulatedBackend::new(4, Duration::ZERO).with_reject_every(1);
        let (tx, _rx) = queue::bounded(16);

        let result = backend.issue(3, query(6), tx).await;
        assert!(matches!(
            result,
            Err(BackendError::Rejected { channel: 3, sample_id: 6, .. })
        ));
    }
}
