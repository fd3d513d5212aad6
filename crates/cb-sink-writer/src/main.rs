//! CB Sink Writer CLI
//!
//! Reads NDJSON-encoded change records from stdin and writes them to
//! Couchbase in fail-fast batches. Exits non-zero on the first batch that
//! could not be fully applied.

use cb_sink_core::prelude::*;
use cb_sink_core::ObservabilityConfig;
use cb_sink_writer::{CouchbaseHttpStore, CouchbaseStoreConfig, MemoryStore, SinkPipeline};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cb-sink-writer")]
#[command(about = "Couchbase batch write pipeline for change record streams")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(long, env = "CB_SINK_CONFIG")]
    config: Option<String>,

    /// Comma-separated Couchbase hosts, overriding the config file
    #[arg(long, env = "CB_HOSTS")]
    hosts: Option<String>,

    /// Target bucket, overriding the config file
    #[arg(long, env = "CB_BUCKET")]
    bucket: Option<String>,

    /// Records per pipeline invocation
    #[arg(long, env = "BATCH_SIZE", default_value = "500")]
    batch_size: usize,

    /// Write to an in-memory store instead of Couchbase
    #[arg(long)]
    dry_run: bool,

    /// Log level, overriding the config file
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SinkConfig::load(args.config.as_deref())?;
    if let Some(hosts) = &args.hosts {
        config.couchbase.hosts = hosts.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(bucket) = args.bucket.clone() {
        config.couchbase.bucket = bucket;
    }
    if let Some(level) = args.log_level.clone() {
        config.observability.log_level = level;
    }

    init_tracing(&config.observability);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting cb-sink-writer");

    let result = if args.dry_run {
        let store = Arc::new(MemoryStore::new());
        store.start().await?;
        let result = drain_stdin(&config, Arc::clone(&store), args.batch_size).await;
        info!(documents = store.len().await, "Dry run complete");
        result
    } else {
        let store = Arc::new(CouchbaseHttpStore::new(CouchbaseStoreConfig::from(
            &config.couchbase,
        ))?);
        store.start().await?;
        let result = drain_stdin(&config, Arc::clone(&store), args.batch_size).await;
        store.stop().await?;
        result
    };

    if let Err(e) = result {
        error!(error = %e, "Sink failed");
        return Err(e);
    }

    info!("Sink stopped gracefully");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if observability.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Feed stdin through the pipeline in batches
async fn drain_stdin<S: DocumentStore>(
    config: &SinkConfig,
    store: Arc<S>,
    batch_size: usize,
) -> anyhow::Result<()> {
    let pipeline = SinkPipeline::from_config(config, store)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch: Vec<ChangeRecord> = Vec::with_capacity(batch_size);
    let mut total = 0u64;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let record: ChangeRecord = serde_json::from_str(&line)
            .map_err(|e| SinkError::serialization_with_source("Invalid change record", e))?;
        batch.push(record);

        if batch.len() >= batch_size {
            total += batch.len() as u64;
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            pipeline.put(full).await?;
        }
    }

    if !batch.is_empty() {
        total += batch.len() as u64;
        pipeline.put(batch).await?;
    }

    info!(records = total, "All batches applied");
    Ok(())
}
