//! TokenRelay CLI - synthetic load sessions through the relay engine.
//!
//! Drives the full pipeline (batcher, dispatch router, classifier,
//! gatherers, reporter) against the simulated backend and reports
//! throughput, time-to-first-token and completion counts.
//!
//! ```bash
//! # Defaults: 64 samples, 2 channels, 16 tokens per sample
//! tokenrelay run
//!
//! # Heavier session with a JSON result file
//! tokenrelay run --samples 512 --channels 4 --tokens 32 --output results.json
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenrelay_core::{
    CompletionSink, Engine, EngineConfig, Query, SampleId, SimulatedBackend, Token,
};

#[derive(Parser)]
#[command(name = "tokenrelay")]
#[command(version)]
#[command(about = "Dispatch, batching and stream reassembly for inference benchmark harnesses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic load session against the simulated backend
    Run {
        /// Number of samples to issue
        #[arg(long, default_value_t = 64)]
        samples: u64,

        /// Number of parallel backend channels
        #[arg(long, default_value_t = 2)]
        channels: usize,

        /// Upper bound on released batch size
        #[arg(long, default_value_t = 8)]
        max_batch: usize,

        /// Upper bound on batching delay in milliseconds
        #[arg(long, default_value_t = 50)]
        max_wait_ms: u64,

        /// Tokens generated per sample
        #[arg(long, default_value_t = 16)]
        tokens: usize,

        /// Simulated inter-token delay in milliseconds
        #[arg(long, default_value_t = 2)]
        token_delay_ms: u64,

        /// Output file for results (JSON)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Sink that tracks per-sample latency and aggregate counts for a session.
struct SessionSink {
    issued_at: Mutex<HashMap<SampleId, Instant>>,
    ttft_ms: Mutex<Vec<f64>>,
    completions: AtomicU64,
    failures: AtomicU64,
    tokens_received: AtomicU64,
}

impl SessionSink {
    fn new() -> Self {
        Self {
            issued_at: Mutex::new(HashMap::new()),
            ttft_ms: Mutex::new(Vec::new()),
            completions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            tokens_received: AtomicU64::new(0),
        }
    }

    fn mark_issued(&self, sample_id: SampleId) {
        self.issued_at
            .lock()
            .unwrap()
            .insert(sample_id, Instant::now());
    }

    fn avg_ttft_ms(&self) -> f64 {
        let samples = self.ttft_ms.lock().unwrap();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

impl CompletionSink for SessionSink {
    fn on_first_token(&self, sample_id: SampleId, _token: Token) {
        if let Some(issued) = self.issued_at.lock().unwrap().get(&sample_id) {
            self.ttft_ms
                .lock()
                .unwrap()
                .push(issued.elapsed().as_secs_f64() * 1000.0);
        }
    }

    fn on_complete(&self, _sample_id: SampleId, tokens: &[Token]) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        self.tokens_received
            .fetch_add(tokens.len() as u64, Ordering::Relaxed);
    }

    fn on_error(&self, sample_id: SampleId, cause: &str) {
        tracing::warn!(sample_id, cause, "sample failed");
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result record for one session.
#[derive(Debug, Serialize)]
struct SessionResult {
    timestamp: String,
    samples: u64,
    channels: usize,
    max_batch: usize,
    max_wait_ms: u64,
    elapsed_ms: f64,
    completions: u64,
    failures: u64,
    tokens_received: u64,
    tokens_per_second: f64,
    avg_ttft_ms: f64,
    avg_batch_size: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tokenrelay=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            samples,
            channels,
            max_batch,
            max_wait_ms,
            tokens,
            token_delay_ms,
            output,
        } => {
            let config = EngineConfig {
                max_batch_size: max_batch,
                max_wait: Duration::from_millis(max_wait_ms),
                num_channels: channels,
                queue_depth: 64,
                eos_token: None,
            };

            let result = run_session(config, samples, tokens, token_delay_ms).await?;
            print_summary(&result);

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&result)
                    .context("Failed to serialize session result")?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write results to {path}"))?;
                info!(path = %path, "results written");
            }
        }
    }

    Ok(())
}

async fn run_session(
    config: EngineConfig,
    samples: u64,
    tokens: usize,
    token_delay_ms: u64,
) -> anyhow::Result<SessionResult> {
    let channels = config.num_channels;
    let max_batch = config.max_batch_size;
    let max_wait_ms = config.max_wait.as_millis() as u64;

    let backend = Arc::new(SimulatedBackend::new(
        tokens,
        Duration::from_millis(token_delay_ms),
    ));
    let sink = Arc::new(SessionSink::new());
    let mut engine = Engine::start(config, backend, sink.clone())
        .context("Failed to start relay engine")?;

    info!(samples, channels, "session starting");
    let started = Instant::now();

    // Issue in bursts the way a load generator would.
    let mut next: SampleId = 1;
    while next <= samples {
        let burst_end = (next + 16).min(samples + 1);
        let queries: Vec<Query> = (next..burst_end)
            .map(|id| {
                sink.mark_issued(id);
                Query::new(id, id - 1, Bytes::from_static(b"synthetic prompt"))
            })
            .collect();
        engine.issue(queries).context("Failed to issue queries")?;
        next = burst_end;
    }

    engine.flush();
    engine.stop().await.context("Engine drain failed")?;

    let elapsed = started.elapsed();
    let metrics = engine.metrics().snapshot();
    let violations = engine.protocol_errors();
    if !violations.is_empty() {
        tracing::error!(count = violations.len(), "protocol violations observed");
    }

    let tokens_received = sink.tokens_received.load(Ordering::Relaxed);
    Ok(SessionResult {
        timestamp: Utc::now().to_rfc3339(),
        samples,
        channels,
        max_batch,
        max_wait_ms,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        completions: sink.completions.load(Ordering::Relaxed),
        failures: sink.failures.load(Ordering::Relaxed),
        tokens_received,
        tokens_per_second: tokens_received as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        avg_ttft_ms: sink.avg_ttft_ms(),
        avg_batch_size: metrics.avg_batch_size,
    })
}

fn print_summary(result: &SessionResult) {
    println!();
    println!("==================================================");
    println!("  TokenRelay session");
    println!("==================================================");
    println!("  Samples:        {}", result.samples);
    println!("  Channels:       {}", result.channels);
    println!(
        "  Batching:       max {} / {} ms window",
        result.max_batch, result.max_wait_ms
    );
    println!();
    println!("  Completions:    {}", result.completions);
    println!("  Failures:       {}", result.failures);
    println!("  Tokens:         {}", result.tokens_received);
    println!("  Elapsed:        {:.1} ms", result.elapsed_ms);
    println!("  Throughput:     {:.1} tokens/s", result.tokens_per_second);
    println!("  Avg TTFT:       {:.2} ms", result.avg_ttft_ms);
    println!("  Avg batch size: {:.2}", result.avg_batch_size);
    println!("==================================================");
    println!();
}
