mod buffer;
mod config;
mod flush;
mod input;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tdship_client_http::HttpImportClient;
use tdship_engine::{Batch, Output, ShipError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinSet};

use crate::buffer::ChunkBuffer;
use crate::config::{AgentConfig, BufferConfig};
use crate::flush::{RetryPolicy, write_with_retry};

#[derive(Parser)]
#[command(name = "tdship-agent", about = "Ship newline-delimited JSON events to the import API")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "tdship.toml", env = "TDSHIP_CONFIG")]
    config: String,

    /// NDJSON input file. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Tag for lines that carry none, e.g. `td.mydb.events`.
    #[arg(long)]
    tag: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "loading configuration");
    let config = match AgentConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let client = match HttpImportClient::new(&config.output.client) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            std::process::exit(1);
        }
    };
    let output = match Output::new(config.output.clone(), Arc::new(client)) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            tracing::error!(error = %e, "invalid output configuration");
            std::process::exit(1);
        }
    };
    if let Err(e) = output.start().await {
        tracing::error!(error = %e, "failed to start output");
        std::process::exit(1);
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.input {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(f) => Box::new(BufReader::new(f)),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to open input");
                std::process::exit(1);
            }
        },
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    tracing::info!(
        chunk_limit = config.buffer.chunk_limit,
        flush_interval = config.buffer.flush_interval,
        "tdship-agent started, press Ctrl+C to flush and stop"
    );
    let failed = run(reader, output, &config.buffer, cli.tag.as_deref()).await;
    if failed > 0 {
        tracing::error!(failed, "some chunks could not be delivered");
        std::process::exit(1);
    }
}

/// Read events until end of input or Ctrl+C, shipping chunks as they fill
/// up or the flush interval passes. Returns the number of undelivered chunks.
async fn run(
    reader: impl AsyncBufRead + Unpin,
    output: Arc<Output>,
    buffer_config: &BufferConfig,
    default_tag: Option<&str>,
) -> usize {
    let policy = RetryPolicy {
        max_retries: buffer_config.max_retries,
        base_delay: buffer_config.retry_wait(),
        max_delay: buffer_config.retry_max_wait(),
    };
    let period = buffer_config.flush_interval();

    let mut buffer = ChunkBuffer::new(buffer_config.chunk_limit);
    let mut flushes = JoinSet::new();
    let mut lines = reader.lines();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut failed = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let (tag, event) = match input::parse_line(&line, default_tag, input::unix_now()) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping malformed line");
                            continue;
                        }
                    };
                    let mut writer = output.writer();
                    match buffer.push(&mut writer, &tag, &event) {
                        Ok(Some(chunk)) => spawn_flush(&mut flushes, &output, chunk, policy),
                        Ok(None) => {}
                        Err(e) => tracing::error!(tag = %tag, error = %e, "failed to buffer event"),
                    }
                }
                Ok(None) => {
                    tracing::info!("end of input");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to read input");
                    break;
                }
            },
            _ = ticker.tick() => {
                for chunk in buffer.drain() {
                    spawn_flush(&mut flushes, &output, chunk, policy);
                }
            }
            Some(done) = flushes.join_next(), if !flushes.is_empty() => {
                failed += outcome(done);
            }
            _ = &mut shutdown => {
                tracing::info!("interrupted, flushing buffered chunks");
                break;
            }
        }
    }

    for chunk in buffer.drain() {
        spawn_flush(&mut flushes, &output, chunk, policy);
    }
    while let Some(done) = flushes.join_next().await {
        failed += outcome(done);
    }
    failed
}

fn spawn_flush(
    flushes: &mut JoinSet<Result<(), ShipError>>,
    output: &Arc<Output>,
    chunk: Batch,
    policy: RetryPolicy,
) {
    tracing::debug!(tag = chunk.tag(), id = %chunk.id(), records = chunk.records(), "chunk ready");
    let output = output.clone();
    let chunk = Arc::new(chunk);
    flushes.spawn(async move { write_with_retry(&output, chunk, policy).await });
}

/// 1 when the chunk was lost, 0 otherwise.
fn outcome(done: Result<Result<(), ShipError>, JoinError>) -> usize {
    match done {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            tracing::error!(error = %e, kind = ?e.kind(), "dropping chunk");
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "flush task failed");
            1
        }
    }
}
