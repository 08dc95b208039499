//! Farmgate ingest binary.
//!
//! Reads frames from the configured source (filesystem range or TCP
//! stream), runs them through the ingestion pipeline, and publishes the
//! normalized payloads to the object store.
//!
//! # Architecture
//!
//! ```text
//! FileSource / StreamSource -> FrameDecoder -> encode_payload
//!                           -> KeyFormatter -> Publisher -> StoreClient
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with FARMGATE_)
//!
//! See `config.rs` for detailed configuration options.

use farmgate::config::{FarmgateConfig, LoggingConfig, SourceMode};
use farmgate::decoder::FrameDecoder;
use farmgate::keys::KeyFormatter;
use farmgate::pipeline::{FrameOutcome, IngestPipeline};
use farmgate::publisher::Publisher;
use farmgate::source::{FileSource, FrameSource, StreamSource};
use farmgate::store::{MemoryStore, StoreClient};

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    init_logging(&config.logging)?;

    info!(
        service = "farmgate",
        version = env!("CARGO_PKG_VERSION"),
        pool = %config.store.pool,
        "Starting frame ingestion pipeline"
    );

    config.validate()?;

    match run_pipeline(config).await {
        Ok(()) => {
            info!("Ingest run completed");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Ingest run failed");
            Err(e)
        }
    }
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<FarmgateConfig> {
    let config = FarmgateConfig::load().or_else(|e| {
        eprintln!("Failed to load config from files ({e}), trying environment");
        FarmgateConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("farmgate={}", level).parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Run the ingestion pipeline to completion or shutdown.
async fn run_pipeline(config: FarmgateConfig) -> anyhow::Result<()> {
    // The store client is constructed here and injected; swap in a real
    // remote client by providing another StoreClient implementation.
    let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());

    let decoder = FrameDecoder::new(
        config.processing.target_width,
        config.processing.target_height,
        config.processing.channel_order,
    )?;
    let formatter = KeyFormatter::new(&config.store.key_prefix)?;
    let publisher = Publisher::new(store, config.store.clone());

    let pipeline = Arc::new(IngestPipeline::new(
        decoder,
        formatter,
        publisher,
        config.store.timestamped_keys,
    ));

    let mut source: Box<dyn FrameSource> = match config.source.mode {
        SourceMode::File => {
            info!(
                base_path = %config.source.file.base_path,
                start = config.source.file.start_index,
                end = config.source.file.end_index,
                "Using file source"
            );
            Box::new(FileSource::new(config.source.file.clone()))
        }
        SourceMode::Stream => {
            info!(
                bind = %config.source.stream.bind_addr,
                port = config.source.stream.port,
                "Using stream source"
            );
            Box::new(StreamSource::bind(config.source.stream.clone()).await?)
        }
    };

    let mut run_handle = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run(source.as_mut()).await }
    });

    tokio::select! {
        outcomes = &mut run_handle => {
            report_outcomes(&outcomes?);
            log_final_stats(&pipeline);
            return Ok(());
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, letting in-flight publish resolve");
            pipeline.stop();
        }
    }

    // Best effort: the frame currently in flight is allowed to resolve.
    match tokio::time::timeout(Duration::from_secs(5), &mut run_handle).await {
        Ok(outcomes) => report_outcomes(&outcomes?),
        Err(_) => {
            warn!("Pipeline did not drain in time, aborting");
            run_handle.abort();
        }
    }

    log_final_stats(&pipeline);
    info!("Shutdown complete");
    Ok(())
}

/// Log a summary of per-frame outcomes.
fn report_outcomes(outcomes: &[FrameOutcome]) {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = outcomes.len() - succeeded;

    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            warn!(
                sequence = outcome.sequence,
                index = ?outcome.index,
                key = ?outcome.key,
                error = %e,
                "Frame was not published"
            );
        }
    }

    info!(
        frames = outcomes.len(),
        succeeded = succeeded,
        failed = failed,
        "Run summary"
    );
}

/// Log final statistics on shutdown.
fn log_final_stats(pipeline: &IngestPipeline) {
    let stats = pipeline.stats();
    info!(
        frames_processed = stats.frames_processed,
        frames_published = stats.frames_published,
        frames_failed = stats.frames_failed,
        bytes_published = stats.bytes_published,
        "Final pipeline stats"
    );
}
