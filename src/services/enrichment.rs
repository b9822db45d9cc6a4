//! Enrichment dispatcher - deferred address / cell-location lookups
//!
//! Slow provider lookups are taken off the ingest path: the pipeline enqueues
//! an `EnrichmentJob` on a bounded channel and the dispatcher runs it on a
//! capped number of concurrent workers. Workers amend the stored event only;
//! a changed serving cell is sent back to the pipeline as an `AssetUpdate`,
//! since the pipeline is the single writer of asset state.

use crate::domain::error::EnrichmentError;
use crate::domain::types::{AssetId, CellTower, EventField, TelemetryEvent};
use crate::infra::metrics::Metrics;
use crate::io::geocoder::{CellLocator, ReverseGeocoder};
use crate::io::store::EventStore;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Requested enrichments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentMask(pub u8);

impl EnrichmentMask {
    pub const NONE: EnrichmentMask = EnrichmentMask(0);
    pub const ADDRESS: EnrichmentMask = EnrichmentMask(0x01);
    pub const CELL_LOCATION: EnrichmentMask = EnrichmentMask(0x02);

    #[inline]
    pub fn contains(self, other: EnrichmentMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EnrichmentMask {
    type Output = EnrichmentMask;

    fn bitor(self, rhs: EnrichmentMask) -> EnrichmentMask {
        EnrichmentMask(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for EnrichmentMask {
    fn bitor_assign(&mut self, rhs: EnrichmentMask) {
        self.0 |= rhs.0;
    }
}

/// An event awaiting enrichment
#[derive(Debug)]
pub struct EnrichmentJob {
    pub event: TelemetryEvent,
    pub mask: EnrichmentMask,
    /// When the job was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Asset-state changes requested by workers, applied by the pipeline
#[derive(Debug, Clone)]
pub enum AssetUpdate {
    ServingCell {
        asset_id: AssetId,
        cell: CellTower,
        /// The enriched event
        event: TelemetryEvent,
        /// The event still lacks an address and none was attempted
        needs_address: bool,
    },
}

/// Producer side of the enrichment queue
#[derive(Clone)]
pub struct EnrichmentSender {
    tx: mpsc::Sender<EnrichmentJob>,
    metrics: Arc<Metrics>,
}

impl EnrichmentSender {
    /// Queue a job without blocking; a full queue drops it
    pub fn enqueue(&self, event: TelemetryEvent, mask: EnrichmentMask) -> bool {
        if mask.is_empty() {
            return false;
        }
        let key = event.key();
        match self.tx.try_send(EnrichmentJob { event, mask, enqueued_at: Instant::now() }) {
            Ok(()) => {
                self.metrics.record_enrichment_queued();
                debug!(key = %key, mask = %mask.0, "enrichment_queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_enrichment_dropped();
                warn!(key = %key, "enrichment_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_enrichment_dropped();
                warn!(key = %key, "enrichment_queue_closed");
                false
            }
        }
    }
}

/// Providers a worker calls out to
pub struct EnrichmentProviders {
    pub store: Arc<dyn EventStore>,
    pub geocoder: Option<Arc<dyn ReverseGeocoder>>,
    pub cell_locator: Option<Arc<dyn CellLocator>>,
}

/// Consumer side: runs jobs with at most `workers` in flight
pub struct EnrichmentDispatcher {
    rx: mpsc::Receiver<EnrichmentJob>,
    providers: Arc<EnrichmentProviders>,
    updates: mpsc::Sender<AssetUpdate>,
    metrics: Arc<Metrics>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl EnrichmentDispatcher {
    /// Run until every sender is dropped, then wait for in-flight jobs
    pub async fn run(mut self) {
        info!(workers = %self.workers, "enrichment_dispatcher_started");

        while let Some(job) = self.rx.recv().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };

            let queue_delay_us = job.enqueued_at.elapsed().as_micros() as u64;
            self.metrics.record_enrichment_delay(queue_delay_us);
            if queue_delay_us > 1_000_000 {
                warn!(key = %job.event.key(), queue_delay_us = %queue_delay_us, "enrichment_queue_delay_high");
            }

            let providers = self.providers.clone();
            let updates = self.updates.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let key = job.event.key();
                match enrich(&providers, job).await {
                    Ok(update) => {
                        metrics.record_enrichment_completed();
                        if let Some(update) = update {
                            if updates.send(update).await.is_err() {
                                debug!(key = %key, "asset_update_dropped");
                            }
                        }
                    }
                    Err(e) => {
                        metrics.record_enrichment_failed();
                        warn!(key = %key, error = %e, "enrichment_failed");
                    }
                }
            });
        }

        // in-flight jobs hold permits
        let _ = self.permits.acquire_many(self.workers as u32).await;
        info!("enrichment_dispatcher_stopped");
    }
}

/// Perform the requested lookups and persist the amended fields
async fn enrich(
    providers: &EnrichmentProviders,
    job: EnrichmentJob,
) -> Result<Option<AssetUpdate>, EnrichmentError> {
    let EnrichmentJob { mut event, mask, .. } = job;
    let mut fields: SmallVec<[EventField; 2]> = SmallVec::new();
    let mut located = None;

    if mask.contains(EnrichmentMask::CELL_LOCATION) {
        if let (Some(locator), Some(cell)) = (&providers.cell_locator, event.cell_tower.clone()) {
            if let Some(point) = locator.locate(&cell).await? {
                event.cell_point = Some(point);
                fields.push(EventField::CellPoint);
                located = Some(cell);
            }
        }
    }

    if mask.contains(EnrichmentMask::ADDRESS) && event.address.is_none() {
        if let (Some(geocoder), Some(point)) = (&providers.geocoder, event.best_point()) {
            if let Some(address) = geocoder.address(&point).await? {
                event.address = Some(address);
                fields.push(EventField::Address);
            }
        }
    }

    if !fields.is_empty() {
        providers.store.update_event(&event, &fields)?;
        debug!(key = %event.key(), fields = %fields.len(), "event_enriched");
    }

    Ok(located.map(|cell| AssetUpdate::ServingCell {
        asset_id: event.asset_id.clone(),
        needs_address: event.address.is_none() && !mask.contains(EnrichmentMask::ADDRESS),
        cell,
        event,
    }))
}

/// Create the enrichment queue, its dispatcher, and the asset-update channel
///
/// Returns the sender (for the pipeline), the dispatcher (to be spawned) and
/// the receiver of asset updates (drained by the pipeline)
pub fn create_enrichment_worker(
    providers: EnrichmentProviders,
    metrics: Arc<Metrics>,
    workers: usize,
    queue_depth: usize,
) -> (EnrichmentSender, EnrichmentDispatcher, mpsc::Receiver<AssetUpdate>) {
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let (update_tx, update_rx) = mpsc::channel(queue_depth.max(1));
    let sender = EnrichmentSender { tx, metrics: metrics.clone() };
    let dispatcher = EnrichmentDispatcher {
        rx,
        providers: Arc::new(providers),
        updates: update_tx,
        metrics,
        permits: Arc::new(Semaphore::new(workers)),
        workers,
    };
    (sender, dispatcher, update_rx)
}
