//! Fleet ingest - telemetry ingestion and asset state pipeline
//!
//! Replays a JSONL telemetry file through the pipeline: validation, motion
//! and accumulator bookkeeping, geozone transitions, enrichment and
//! notifications.
//!
//! Module structure:
//! - `domain/` - Core business types (events, asset state, geozones, status codes)
//! - `io/` - Collaborators (store, rules, geocoder, notifier, outbox, replay)
//! - `services/` - Business logic (Pipeline and its stages)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use fleet_ingest::infra::{Metrics, PipelineConfig};
use fleet_ingest::io::{
    create_outbox, replay_file, ConfigRecipients, ConfigRuleEngine, HttpCellLocator, HttpGeocoder,
    MemoryStore, StaticGeozoneDirectory,
};
use fleet_ingest::services::{Collaborators, Pipeline};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fleet ingest - telemetry ingestion pipeline
#[derive(Parser, Debug)]
#[command(name = "fleet-ingest", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// JSONL file of telemetry events to ingest
    events: String,

    /// Notification outbox file (overrides [notify].outbox_file)
    #[arg(short, long)]
    outbox: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "fleet-ingest starting");

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(|| PipelineConfig::resolve_config_path(&[]));
    let config = PipelineConfig::load_from_path(&config_path);
    let outbox_file = args.outbox.clone().unwrap_or_else(|| config.outbox_file().to_string());

    info!(
        config_file = %config.config_file(),
        events_file = %args.events,
        outbox_file = %outbox_file,
        geozones = %config.geozones().len(),
        rules = %config.rules().len(),
        assets = %config.assets().len(),
        enrichment_workers = %config.enrichment_workers(),
        geocoder = %config.geocoder_url().unwrap_or("none"),
        cell_locator = %config.cell_locator_url().unwrap_or("none"),
        max_synth_depth = %config.max_synth_depth(),
        "config_loaded"
    );

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(MemoryStore::with_assets(config.assets()));
    let rules = ConfigRuleEngine::new(config.rules())?;
    let (notifier, outbox_writer) = create_outbox(&outbox_file, metrics.clone(), config.outbox_queue_depth());
    let outbox_handle = tokio::spawn(outbox_writer.run());

    let mut collaborators = Collaborators::new(store.clone())
        .with_rules(Arc::new(rules))
        .with_notifier(Arc::new(notifier))
        .with_recipients(Arc::new(ConfigRecipients::new(&config)))
        .with_geozones(Arc::new(StaticGeozoneDirectory::new(config.geozones(), config.groups())));
    if let Some(url) = config.geocoder_url() {
        collaborators = collaborators.with_geocoder(Arc::new(HttpGeocoder::new(url, config.provider_timeout_ms())));
    }
    if let Some(url) = config.cell_locator_url() {
        collaborators =
            collaborators.with_cell_locator(Arc::new(HttpCellLocator::new(url, config.provider_timeout_ms())));
    }

    let mut pipeline = Pipeline::new(config, collaborators, metrics.clone());
    let dispatcher_handle = pipeline.start_enrichment().map(|dispatcher| tokio::spawn(dispatcher.run()));

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);
    let events_file = args.events.clone();
    let replay_handle = tokio::spawn(async move { replay_file(&events_file, event_tx).await });

    // Stop reading on Ctrl+C; the pipeline drains what was already queued
    let replay_abort = replay_handle.abort_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        replay_abort.abort();
    });

    // Run pipeline - consumes events until channel closes
    info!("pipeline_started");
    pipeline.run(event_rx).await;

    match replay_handle.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %format!("{:#}", e), "replay_failed"),
        Err(_) => info!("replay_cancelled"),
    }

    // Let in-flight enrichment finish, applying what it sends back
    let applied = match dispatcher_handle {
        Some(handle) => pipeline.finish_enrichment(handle).await,
        None => pipeline.drain_updates(),
    };
    metrics.report(pipeline.tracked_assets()).log();
    info!(assets = %pipeline.tracked_assets(), stored_events = %store.event_count(), late_updates = %applied, "pipeline_drained");

    // Dropping the pipeline closes the notifier channel
    drop(pipeline);
    if outbox_handle.await.is_err() {
        error!("outbox_writer_panicked");
    }

    info!("fleet-ingest shutdown complete");
    Ok(())
}
