//! Event ingestion and asset state orchestration
//!
//! The Pipeline is the single writer of every asset's last-known state. For
//! each event it coordinates:
//! - Validation and normalization (rejects leave no trace)
//! - Motion state and accumulated metrics
//! - Persistence of the event, then deferred enrichment
//! - Geozone / corridor / fuel events synthesized through a bounded work queue
//! - Rule evaluation and zone auto-notify
//! - Partial persistence of the changed asset fields

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::asset::{AssetField, AssetState};
use crate::domain::error::IngestResult;
use crate::domain::geozone::GeozoneTransition;
use crate::domain::types::{epoch_sec, AssetId, EventKey, TelemetryEvent};
use crate::infra::config::PipelineConfig;
use crate::infra::metrics::Metrics;
use crate::io::geocoder::{CellLocator, ReverseGeocoder};
use crate::io::geozones::GeozoneDirectory;
use crate::io::notifier::{Notifier, RecipientDirectory};
use crate::io::rules::RuleEngine;
use crate::io::store::EventStore;
use crate::services::accumulator::AccumulatorEngine;
use crate::services::enrichment::{
    create_enrichment_worker, AssetUpdate, EnrichmentDispatcher, EnrichmentProviders,
    EnrichmentSender,
};
use crate::services::motion::MotionTracker;
use crate::services::notify::NotificationTrigger;
use crate::services::validator::Validator;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// External collaborators injected per pipeline instance
pub struct Collaborators {
    pub store: Arc<dyn EventStore>,
    pub rules: Option<Arc<dyn RuleEngine>>,
    pub geocoder: Option<Arc<dyn ReverseGeocoder>>,
    pub cell_locator: Option<Arc<dyn CellLocator>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub recipients: Option<Arc<dyn RecipientDirectory>>,
    pub geozones: Option<Arc<dyn GeozoneDirectory>>,
}

impl Collaborators {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            rules: None,
            geocoder: None,
            cell_locator: None,
            notifier: None,
            recipients: None,
            geozones: None,
        }
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleEngine>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_cell_locator(mut self, locator: Arc<dyn CellLocator>) -> Self {
        self.cell_locator = Some(locator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_recipients(mut self, recipients: Arc<dyn RecipientDirectory>) -> Self {
        self.recipients = Some(recipients);
        self
    }

    pub fn with_geozones(mut self, geozones: Arc<dyn GeozoneDirectory>) -> Self {
        self.geozones = Some(geozones);
        self
    }
}

/// Result of ingesting one primary event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Zero-status liveness signal; nothing stored or changed
    Heartbeat,
    Stored {
        key: EventKey,
        /// Keys of the events synthesized and stored as a consequence, in order
        synthesized: Vec<EventKey>,
    },
}

/// An event waiting in the work queue
#[derive(Debug)]
pub(crate) struct PendingEvent {
    pub(crate) event: TelemetryEvent,
    /// 0 for the primary event
    pub(crate) depth: u32,
    /// The zone crossing a synthesized arrive/depart event stands for
    pub(crate) transition: Option<GeozoneTransition>,
}

/// Central event processor and owner of asset state
pub struct Pipeline {
    /// Cached last-known state by asset
    pub(crate) assets: FxHashMap<AssetId, AssetState>,
    /// Asset fields whose persistence failed, retried with the next write
    pub(crate) unsaved: FxHashMap<AssetId, Vec<AssetField>>,
    pub(crate) validator: Validator,
    pub(crate) motion: MotionTracker,
    pub(crate) accumulators: AccumulatorEngine,
    pub(crate) notify: NotificationTrigger,
    pub(crate) collaborators: Collaborators,
    pub(crate) config: PipelineConfig,
    pub(crate) metrics: Arc<Metrics>,
    /// Enrichment queue (None until `start_enrichment`)
    pub(crate) enrichment: Option<EnrichmentSender>,
    /// Asset updates sent back by enrichment workers
    pub(crate) updates: Option<mpsc::Receiver<AssetUpdate>>,
}

impl Pipeline {
    /// Create a new Pipeline with the given configuration and collaborators
    pub fn new(config: PipelineConfig, collaborators: Collaborators, metrics: Arc<Metrics>) -> Self {
        let notify = NotificationTrigger::new(
            &config,
            collaborators.rules.clone(),
            collaborators.notifier.clone(),
            collaborators.recipients.clone(),
            metrics.clone(),
        );
        Self {
            assets: FxHashMap::default(),
            unsaved: FxHashMap::default(),
            validator: Validator::new(&config),
            motion: MotionTracker::new(&config),
            accumulators: AccumulatorEngine::new(&config),
            notify,
            collaborators,
            config,
            metrics,
            enrichment: None,
            updates: None,
        }
    }

    /// Wire up the enrichment queue; returns the dispatcher to be spawned.
    ///
    /// None when neither a geocoder nor a cell locator is configured.
    pub fn start_enrichment(&mut self) -> Option<EnrichmentDispatcher> {
        if self.collaborators.geocoder.is_none() && self.collaborators.cell_locator.is_none() {
            return None;
        }
        let providers = EnrichmentProviders {
            store: self.collaborators.store.clone(),
            geocoder: self.collaborators.geocoder.clone(),
            cell_locator: self.collaborators.cell_locator.clone(),
        };
        let (sender, dispatcher, updates) = create_enrichment_worker(
            providers,
            self.metrics.clone(),
            self.config.enrichment_workers(),
            self.config.enrichment_queue_depth(),
        );
        self.enrichment = Some(sender);
        self.updates = Some(updates);
        Some(dispatcher)
    }

    /// Drop the enrichment queue so the dispatcher can finish
    pub fn close_enrichment(&mut self) {
        self.enrichment = None;
    }

    /// Start the pipeline, consuming events from the channel
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<TelemetryEvent>) {
        let mut updates = self.updates.take();
        let mut report_interval =
            interval(Duration::from_secs(self.config.metrics_interval_secs().max(1)));

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        // failures are logged and counted where they happen
                        Some(e) => { let _ = self.ingest(e); }
                        None => break, // Channel closed
                    }
                }
                Some(update) = recv_update(&mut updates) => {
                    self.apply_update(update);
                }
                _ = report_interval.tick() => {
                    self.metrics.report(self.assets.len()).log();
                }
            }
        }

        self.updates = updates;
        info!(assets = %self.assets.len(), "pipeline_stopped");
    }

    /// Close the enrichment queue and wait for the dispatcher, applying asset
    /// updates as they arrive so no worker blocks on a full update channel.
    ///
    /// Returns the number of updates applied.
    pub async fn finish_enrichment(&mut self, mut dispatcher: JoinHandle<()>) -> usize {
        self.close_enrichment();
        let mut updates = self.updates.take();
        let mut applied = 0;

        loop {
            tokio::select! {
                result = &mut dispatcher => {
                    if result.is_err() {
                        error!("enrichment_dispatcher_panicked");
                    }
                    break;
                }
                Some(update) = recv_update(&mut updates) => {
                    self.apply_update(update);
                    applied += 1;
                }
            }
        }

        self.updates = updates;
        applied + self.drain_updates()
    }

    /// Apply every asset update already received from enrichment workers
    pub fn drain_updates(&mut self) -> usize {
        let mut drained = 0;
        while let Some(update) = self.updates.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.apply_update(update);
            drained += 1;
        }
        drained
    }

    /// Ingest one event at the current wall-clock time
    pub fn ingest(&mut self, event: TelemetryEvent) -> IngestResult<IngestOutcome> {
        self.ingest_at(event, epoch_sec())
    }

    /// Ingest one event, with `now` (epoch seconds) as the validation clock.
    ///
    /// Synthesized events are processed from a work queue after the primary
    /// event; their failures are logged and never fail the primary.
    pub fn ingest_at(&mut self, event: TelemetryEvent, now: i64) -> IngestResult<IngestOutcome> {
        let process_start = Instant::now();
        let mut queue = VecDeque::new();

        let primary = PendingEvent { event, depth: 0, transition: None };
        let Some(key) = self.process(primary, now, &mut queue)? else {
            return Ok(IngestOutcome::Heartbeat);
        };

        let mut synthesized = Vec::new();
        while let Some(pending) = queue.pop_front() {
            let pending_key = pending.event.key();
            if pending.depth > self.config.max_synth_depth() {
                self.metrics.record_synth_dropped();
                warn!(key = %pending_key, depth = %pending.depth, "synthesized_depth_exceeded");
                continue;
            }
            match self.process(pending, now, &mut queue) {
                Ok(Some(stored)) => {
                    self.metrics.record_synthesized();
                    synthesized.push(stored);
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_synth_dropped();
                    warn!(key = %pending_key, error = %e, "synthesized_event_failed");
                }
            }
        }

        // Record processing latency (lock-free)
        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_accepted(latency_us);
        Ok(IngestOutcome::Stored { key, synthesized })
    }

    /// Cached state of an asset
    pub fn asset_state(&self, asset_id: &AssetId) -> Option<&AssetState> {
        self.assets.get(asset_id)
    }

    /// Aged events-per-second estimate of an asset at `now_ms`
    pub fn events_per_second_at(&self, asset_id: &AssetId, now_ms: i64) -> Option<f64> {
        self.assets
            .get(asset_id)
            .map(|state| self.accumulators.event_rate().events_per_second_at(state, now_ms))
    }

    /// Get current tracked asset count
    pub fn tracked_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

async fn recv_update(updates: &mut Option<mpsc::Receiver<AssetUpdate>>) -> Option<AssetUpdate> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
