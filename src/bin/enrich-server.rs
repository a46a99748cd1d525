//! Demo server for the enrichment engine
//!
//! Reads JSON-lines events from a file or stdin, runs them through the full
//! partitioned pipeline against in-memory boundaries, and writes dispatched
//! batches as JSON lines to stdout. Intended for local experimentation and
//! smoke testing; production deployments wire real boundary implementations
//! into `EngineCoordinator` instead.

use clap::Parser;
use enrichstream::enrichstream::boundary::{CollectingInferenceSink, InMemoryLookupStore};
use enrichstream::enrichstream::engine::batcher::BatcherConfig;
use enrichstream::enrichstream::engine::dead_letter::DeadLetterQueue;
use enrichstream::enrichstream::engine::session::SessionConfig;
use enrichstream::enrichstream::engine::watermark::WatermarkConfig;
use enrichstream::enrichstream::server::prometheus_exporter::EnginePrometheusExporter;
use enrichstream::enrichstream::server::shutdown::shutdown_signal;
use enrichstream::{EngineConfig, EngineCoordinator, Event};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "enrich-server")]
#[command(about = "Run the event-enrichment engine over a JSON-lines event stream")]
#[command(version = "0.1.0")]
struct Cli {
    /// Input path with one JSON event per line, or "-" for stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Number of partition runners
    #[arg(long)]
    partitions: Option<usize>,

    /// Maximum records per batch
    #[arg(long, default_value = "64")]
    max_batch_size: usize,

    /// Batch latency budget in milliseconds
    #[arg(long, default_value = "500")]
    latency_budget_ms: u64,

    /// Allowed event-time lateness in milliseconds
    #[arg(long, default_value = "60000")]
    allowed_lateness_ms: u64,

    /// Session inactivity timeout in milliseconds
    #[arg(long, default_value = "1800000")]
    session_timeout_ms: u64,

    /// Print Prometheus metrics text on exit
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = EngineConfig {
        watermark: WatermarkConfig {
            allowed_lateness: Duration::from_millis(cli.allowed_lateness_ms),
        },
        session: SessionConfig {
            session_timeout: Duration::from_millis(cli.session_timeout_ms),
            ..Default::default()
        },
        batcher: BatcherConfig {
            max_batch_size: cli.max_batch_size,
            latency_budget: Duration::from_millis(cli.latency_budget_ms),
        },
        ..Default::default()
    };
    if let Some(partitions) = cli.partitions {
        config.num_partitions = partitions;
    }
    let num_partitions = config.num_partitions;

    let lookup_store = Arc::new(InMemoryLookupStore::new());
    let sink = Arc::new(CollectingInferenceSink::new());
    let dead_letters = Arc::new(DeadLetterQueue::new());

    let engine = EngineCoordinator::start(
        config,
        lookup_store,
        sink.clone(),
        dead_letters.clone(),
    )?;
    let exporter = EnginePrometheusExporter::new(num_partitions)?;
    let metrics_handles = engine.metrics_handles();

    info!(
        "enrich-server started: {} partitions, input '{}'",
        num_partitions, cli.input
    );

    let feed = feed_events(&cli.input, &engine);
    tokio::select! {
        result = feed => {
            if let Err(e) = result {
                error!("Input stream failed: {}", e);
            }
        }
        signal = shutdown_signal() => {
            info!("Stopping on {}", signal);
        }
    }

    let summary = engine.shutdown().await?;
    info!("Final stats: {}", summary.format_summary());

    for batch in sink.accepted_batches().await {
        println!("{}", serde_json::to_string(&batch)?);
    }

    let dead = dead_letters.entries().await;
    if !dead.is_empty() {
        warn!("{} events dead-lettered; first: {}", dead.len(), dead[0].last_error);
    }

    if cli.metrics {
        exporter.update(&metrics_handles);
        eprintln!("{}", exporter.export());
    }

    Ok(())
}

/// Stream JSON-lines events from the input into the engine.
async fn feed_events(
    input: &str,
    engine: &EngineCoordinator,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut parse_failures = 0u64;

    if input == "-" {
        let reader = BufReader::new(tokio::io::stdin());
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            submit_line(engine, &line, &mut parse_failures).await?;
        }
    } else {
        let file = tokio::fs::File::open(input).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            submit_line(engine, &line, &mut parse_failures).await?;
        }
    }

    if parse_failures > 0 {
        warn!("{} input lines were not valid events", parse_failures);
    }
    Ok(())
}

async fn submit_line(
    engine: &EngineCoordinator,
    line: &str,
    parse_failures: &mut u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Event>(line) {
        Ok(event) => engine.submit(event).await?,
        Err(e) => {
            *parse_failures += 1;
            warn!("Skipping unparseable event line: {}", e);
        }
    }
    Ok(())
}
