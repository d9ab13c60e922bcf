//! Error types for the relay engine.
//!
//! Library code returns the specific error for its layer; the binary wraps
//! everything in `anyhow` at the boundary.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::types::{ChannelId, SampleId};

/// A backend broke the streaming protocol for one sample.
///
/// Protocol violations are fatal for the affected sample, never retried and
/// never silently dropped; they do not abort other in-flight samples.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A continuation or final event arrived for a sample with no live
    /// accumulator (no prior first token, or the sample already finalized).
    #[error("continuation for sample {sample_id} with no prior first token")]
    MissingFirst { sample_id: SampleId },

    /// A second first-token event arrived while the sample was still
    /// accumulating.
    #[error("duplicate first token for sample {sample_id}")]
    DuplicateFirst { sample_id: SampleId },
}

impl ProtocolError {
    /// The sample the violation was observed on.
    pub fn sample_id(&self) -> SampleId {
        match self {
            Self::MissingFirst { sample_id } | Self::DuplicateFirst { sample_id } => *sample_id,
        }
    }
}

/// Errors surfaced by a [`StreamBackend`](crate::backend::StreamBackend).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused to accept the query.
    #[error("channel {channel} rejected sample {sample_id}: {message}")]
    Rejected {
        channel: ChannelId,
        sample_id: SampleId,
        message: String,
    },

    /// The transport to the backend failed.
    #[error("transport failure on channel {channel}: {message}")]
    Transport { channel: ChannelId, message: String },
}

/// Invalid engine configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_batch_size must be at least 1")]
    ZeroBatchSize,

    #[error("max_wait must be greater than zero")]
    ZeroMaxWait,

    #[error("num_channels must be at least 1")]
    ZeroChannels,

    #[error("queue_depth must be at least 1")]
    ZeroQueueDepth,
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `issue` was called after `flush`; a usage error reported
    /// synchronously to the caller.
    #[error("engine is draining, no new queries accepted")]
    ShutdownInProgress,

    /// An internal pipeline stage shut down before the engine did.
    #[error("pipeline stage unavailable: {0}")]
    Closed(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A worker task panicked or was cancelled during `stop`.
    #[error("worker failed to join: {0}")]
    Join(String),
}

/// Shared collection point for protocol violations observed by the
/// gatherers. Violations are isolated per sample, so the pipeline keeps
/// running; the caller inspects the sink after (or during) a run.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    inner: Arc<Mutex<Vec<ProtocolError>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one violation.
    pub(crate) fn record(&self, error: ProtocolError) {
        self.inner.lock().expect("error sink poisoned").push(error);
    }

    /// Snapshot of everything recorded so far.
    pub fn snapshot(&self) -> Vec<ProtocolError> {
        self.inner.lock().expect("error sink poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("error sink poisoned").is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MissingFirst { sample_id: 42 };
        assert_eq!(
            err.to_string(),
            "continuation for sample 42 with no prior first token"
        );
        assert_eq!(err.sample_id(), 42);

        let err = ProtocolError::DuplicateFirst { sample_id: 9 };
        assert_eq!(err.to_string(), "duplicate first token for sample 9");
        assert_eq!(err.sample_id(), 9);
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Rejected {
            channel: 2,
            sample_id: 5,
            message: "queue full".to_string(),
        };
        assert_eq!(err.to_string(), "channel 2 rejected sample 5: queue full");
    }

    #[test]
    fn test_engine_error_from_protocol() {
        let err = EngineError::from(ProtocolError::MissingFirst { sample_id: 1 });
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn test_error_sink_records_and_snapshots() {
        let sink = ErrorSink::new();
        assert!(sink.is_empty());

        sink.record(ProtocolError::MissingFirst { sample_id: 1 });
        sink.record(ProtocolError::DuplicateFirst { sample_id: 2 });

        let seen = sink.snapshot();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].sample_id(), 1);
        assert_eq!(seen[1].sample_id(), 2);
        assert!(!sink.is_empty());
    }
}
