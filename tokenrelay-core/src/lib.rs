//! TokenRelay core engine.
//!
//! A dispatch / adaptive-batching / streaming-reassembly engine for ML
//! inference benchmark harnesses. The engine accepts a stream of inference
//! queries from a load generator, batches them adaptively, dispatches them
//! round-robin across a fixed set of backend channels, reassembles streamed
//! partial results into ordered completions, and reports completions back
//! through the load generator's completion interface — under concurrent
//! operation with bounded memory and graceful drain-to-completion shutdown.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bytes::Bytes;
//! use tokenrelay_core::{
//!     CompletionSink, Engine, EngineConfig, Query, SampleId, SimulatedBackend, Token,
//! };
//!
//! struct PrintSink;
//!
//! impl CompletionSink for PrintSink {
//!     fn on_first_token(&self, sample_id: SampleId, token: Token) {
//!         println!("first token for {sample_id}: {token}");
//!     }
//!     fn on_complete(&self, sample_id: SampleId, tokens: &[Token]) {
//!         println!("sample {sample_id} finished with {} tokens", tokens.len());
//!     }
//!     fn on_error(&self, sample_id: SampleId, cause: &str) {
//!         eprintln!("sample {sample_id} failed: {cause}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(SimulatedBackend::new(16, Duration::from_millis(2)));
//!     let mut engine = Engine::start(EngineConfig::default(), backend, Arc::new(PrintSink))?;
//!
//!     let queries = (0..32).map(|id| Query::new(id, id, Bytes::new())).collect();
//!     engine.issue(queries)?;
//!
//!     engine.flush();
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batcher;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gatherer;
pub mod metrics;
pub mod queue;
pub mod reporter;
pub mod types;

pub use backend::{EventSender, SimulatedBackend, StreamBackend};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{BackendError, ConfigError, EngineError, ProtocolError};
pub use gatherer::InFlightTable;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use reporter::CompletionSink;
pub use types::{ChannelId, CompletionRecord, Query, SampleId, StreamEvent, Token};
