//! Core data types shared by every pipeline stage.

use bytes::Bytes;

/// Unique identifier for one unit of work issued by the load generator.
///
/// Sample ids are never reused for the lifetime of a test run.
pub type SampleId = u64;

/// One unit of a streamed response.
pub type Token = u32;

/// Identifier of a dispatch channel (one of `N` homogeneous backend replicas).
pub type ChannelId = usize;

/// One inference request as issued by the load generator.
///
/// Immutable after creation; owned by whichever pipeline stage currently
/// holds it and handed off by value until the backend consumes it.
#[derive(Debug, Clone)]
pub struct Query {
    /// Unique sample id assigned by the load generator.
    pub id: SampleId,

    /// Index into the dataset the load generator draws from.
    pub content_index: u64,

    /// Opaque request payload, passed through to the backend untouched.
    pub payload: Bytes,
}

impl Query {
    /// Create a new query.
    pub fn new(id: SampleId, content_index: u64, payload: Bytes) -> Self {
        Self { id, content_index, payload }
    }
}

/// An asynchronous response event arriving from a backend channel.
///
/// For every streaming sample exactly one `First` event is produced and it
/// precedes any `Continuation` for that sample; the stream is terminated by
/// exactly one event with `is_final` set, or by a single `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The earliest token of a sample's response stream.
    First {
        sample_id: SampleId,
        token: Token,
        /// Set on single-token (non-streaming) responses.
        is_final: bool,
    },

    /// Any token after the first.
    Continuation {
        sample_id: SampleId,
        token: Token,
        is_final: bool,
    },

    /// The backend call failed before the stream could complete.
    Error { sample_id: SampleId, cause: String },
}

impl StreamEvent {
    /// The sample this event belongs to.
    pub fn sample_id(&self) -> SampleId {
        match self {
            Self::First { sample_id, .. }
            | Self::Continuation { sample_id, .. }
            | Self::Error { sample_id, .. } => *sample_id,
        }
    }
}

/// A finalized event handed to the completion reporter.
///
/// Consumed exactly once; `Failed` carries the distinct tag that lets the
/// load generator tell "answered" from "errored".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionRecord {
    /// The first token of a sample became available.
    FirstToken { sample_id: SampleId, token: Token },

    /// A sample's stream finished; `tokens` is the full ordered response.
    Complete { sample_id: SampleId, tokens: Vec<Token> },

    /// A sample failed before reaching finality.
    Failed { sample_id: SampleId, cause: String },
}

impl CompletionRecord {
    /// The sample this record belongs to.
    pub fn sample_id(&self) -> SampleId {
        match self {
            Self::FirstToken { sample_id, .. }
            | Self::Complete { sample_id, .. }
            | Self::Failed { sample_id, .. } => *sample_id,
        }
    }
}
