//! Per-event processing for Pipeline

use super::{Pipeline, PendingEvent};
use crate::domain::asset::{AssetField, AssetState};
use crate::domain::error::{IngestError, IngestResult};
use crate::domain::geozone::{Geozone, GeozoneTransition, TransitionKind};
use crate::domain::status::StatusCode;
use crate::domain::types::{EventKey, TelemetryEvent};
use crate::io::geocoder::Lookup;
use crate::services::enrichment::{AssetUpdate, EnrichmentMask};
use crate::services::geozone_detector::{GeozoneDetector, Transitions};
use crate::services::motion::MotionChange;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

impl PendingEvent {
    fn synthesized(event: TelemetryEvent, depth: u32) -> Self {
        Self { event, depth, transition: None }
    }

    fn from_transition(parent: &TelemetryEvent, transition: GeozoneTransition, depth: u32) -> Self {
        let mut event = parent.synthesize(transition.timestamp, transition.kind.status_code());
        event.geozone_id = Some(transition.zone.id.clone());
        Self { event, depth, transition: Some(transition) }
    }
}

impl Pipeline {
    /// Process one event. Returns the stored key, or None for a heartbeat.
    ///
    /// Follow-up events are pushed onto `queue`; on error the asset state is
    /// left exactly as it was.
    pub(crate) fn process(
        &mut self,
        pending: PendingEvent,
        now: i64,
        queue: &mut VecDeque<PendingEvent>,
    ) -> IngestResult<Option<EventKey>> {
        let PendingEvent { mut event, depth, transition } = pending;

        if let Err(reason) = self.validator.validate(&mut event, now) {
            self.metrics.record_event_rejected();
            warn!(asset = %event.asset_id, ts = %event.timestamp, reason = %reason, "event_rejected");
            return Err(IngestError::Rejected(reason));
        }

        if event.status_code.is_none() {
            self.metrics.record_heartbeat();
            debug!(asset = %event.asset_id, ts = %event.timestamp, "heartbeat");
            return Ok(None);
        }

        let original = self.load_state(&event)?;
        if event.account_id.is_empty() {
            event.account_id = original.account_id.clone();
        }
        let mut state = original.clone();
        let in_order = event.timestamp >= state.last_event_time;

        let zone = self.resolve_zone(&state, &event);
        let mut children: SmallVec<[PendingEvent; 3]> = SmallVec::new();

        if !event.synthesized {
            let transitions = self.detect_transitions(&state, &event, zone.as_ref());
            if in_order {
                self.log_motion_change(&event, self.motion.update(&mut state, &event));
            }
            let fuel_change = self.accumulators.apply(&mut state, &mut event, in_order, now * 1000);

            // derived after accumulation so they carry the estimated counters
            for t in transitions {
                children.push(PendingEvent::from_transition(&event, t, depth + 1));
            }
            if let Some(code) = fuel_change {
                children.push(PendingEvent::synthesized(event.synthesize(event.timestamp, code), depth + 1));
            }
        }

        if let Some(t) = &transition {
            if let Some(code) = self.apply_corridor(&mut state, t) {
                children.push(PendingEvent::synthesized(event.synthesize(event.timestamp, code), depth + 1));
            }
        }

        let annotation = transition.as_ref().map(|t| &t.zone).or(zone.as_ref());
        self.annotate_zone(&mut event, annotation);
        let mask = self.plan_enrichment(&mut state, &mut event, in_order);

        let key = event.key();
        if let Err(e) = self.collaborators.store.save_event(&event) {
            self.metrics.record_store_failure();
            warn!(key = %key, error = %e, "event_store_failed");
            return Err(IngestError::Store(e));
        }
        debug!(key = %key, in_order = %in_order, depth = %depth, "event_stored");

        if !mask.is_empty() {
            self.requeue_enrichment(event.clone(), mask);
        }

        self.notify.evaluate(&mut state, &event);
        if let Some(t) = &transition {
            self.notify.auto_notify(&state, &event, t);
        }

        self.commit_state(&original, state);
        queue.extend(children);
        Ok(Some(key))
    }

    /// Apply an update sent back by an enrichment worker
    pub fn apply_update(&mut self, update: AssetUpdate) {
        match update {
            AssetUpdate::ServingCell { asset_id, cell, event, needs_address } => {
                let Some(state) = self.assets.get_mut(&asset_id) else {
                    debug!(asset = %asset_id, "serving_cell_unknown_asset");
                    return;
                };

                // the serving cell follows the newest event only
                if event.timestamp < state.last_event_time {
                    debug!(asset = %asset_id, key = %event.key(), last_event_time = %state.last_event_time, "serving_cell_stale");
                } else if state.serving_cell.as_ref() != Some(&cell) {
                    info!(asset = %asset_id, cell = %cell, "serving_cell_updated");
                    state.serving_cell = Some(cell);

                    if let Err(e) = self.collaborators.store.update_asset(state, &[AssetField::ServingCell]) {
                        warn!(asset = %asset_id, error = %e, "asset_update_failed");
                        let pending = self.unsaved.entry(asset_id.clone()).or_default();
                        if !pending.contains(&AssetField::ServingCell) {
                            pending.push(AssetField::ServingCell);
                        }
                    }
                }

                // the cell fix is the only location this event has
                if needs_address && self.config.reverse_geocode_enabled() && self.collaborators.geocoder.is_some() {
                    self.requeue_enrichment(event, EnrichmentMask::ADDRESS);
                }
            }
        }
    }

    /// Hand an event to the enrichment workers; false when dropped
    pub fn requeue_enrichment(&self, event: TelemetryEvent, mask: EnrichmentMask) -> bool {
        match &self.enrichment {
            Some(sender) => sender.enqueue(event, mask),
            None => {
                debug!(key = %event.key(), mask = %mask.0, "enrichment_not_started");
                false
            }
        }
    }

    /// Cached state, else the stored state, else a fresh one.
    ///
    /// Only `commit_state` caches, so a failed event leaves no trace.
    fn load_state(&self, event: &TelemetryEvent) -> IngestResult<AssetState> {
        if let Some(state) = self.assets.get(&event.asset_id) {
            return Ok(state.clone());
        }
        match self.collaborators.store.load_asset(&event.asset_id) {
            Ok(Some(state)) => Ok(state),
            Ok(None) => {
                info!(asset = %event.asset_id, account = %event.account_id, "asset_created");
                Ok(AssetState::new(event.asset_id.clone(), &event.account_id))
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(asset = %event.asset_id, error = %e, "asset_load_failed");
                Err(IngestError::Store(e))
            }
        }
    }

    fn resolve_zone(&self, state: &AssetState, event: &TelemetryEvent) -> Option<Geozone> {
        let directory = self.collaborators.geozones.as_ref()?;
        let point = event.valid_point()?;
        directory.zone_at(&state.account_id, &state.asset_id, &point)
    }

    fn detect_transitions(&self, state: &AssetState, event: &TelemetryEvent, zone: Option<&Geozone>) -> Transitions {
        match &self.collaborators.geozones {
            Some(directory) => GeozoneDetector::detect(directory.as_ref(), state, event, zone),
            None => Transitions::new(),
        }
    }

    fn log_motion_change(&self, event: &TelemetryEvent, change: MotionChange) {
        match change {
            MotionChange::Started => info!(asset = %event.asset_id, ts = %event.timestamp, "motion_started"),
            MotionChange::Stopped => info!(asset = %event.asset_id, ts = %event.timestamp, "motion_stopped"),
            MotionChange::Unchanged => {}
        }
    }

    /// Record the zone on the event; a reverse-geocode zone also supplies the address
    fn annotate_zone(&self, event: &mut TelemetryEvent, zone: Option<&Geozone>) {
        let Some(zone) = zone else {
            return;
        };
        if event.geozone_id.is_none() {
            event.geozone_id = Some(zone.id.clone());
        }
        if self.config.address_from_geozone()
            && zone.reverse_geocode
            && event.address.is_none()
            && !zone.description.trim().is_empty()
        {
            event.address = Some(zone.description.clone());
        }
    }

    /// Corridor bookkeeping for a synthesized arrive/depart event.
    ///
    /// Returns the corridor status event to synthesize when the active corridor changes.
    fn apply_corridor(&self, state: &mut AssetState, transition: &GeozoneTransition) -> Option<StatusCode> {
        let zone = &transition.zone;
        match transition.kind {
            TransitionKind::Depart if zone.corridor_start && zone.has_corridor() => {
                if state.active_corridor == zone.corridor_id {
                    return None;
                }
                state.active_corridor = zone.corridor_id.clone();
                info!(asset = %state.asset_id, zone = %zone.id, corridor = %zone.corridor_id.as_deref().unwrap_or(""), "corridor_activated");
                Some(StatusCode::CORRIDOR_ACTIVE)
            }
            TransitionKind::Arrive if zone.corridor_end => {
                let corridor = state.active_corridor.take()?;
                info!(asset = %state.asset_id, zone = %zone.id, corridor = %corridor, "corridor_deactivated");
                Some(StatusCode::CORRIDOR_INACTIVE)
            }
            _ => None,
        }
    }

    /// Try the providers' fast paths; whatever they cannot answer now is deferred
    fn plan_enrichment(&self, state: &mut AssetState, event: &mut TelemetryEvent, in_order: bool) -> EnrichmentMask {
        let mut mask = EnrichmentMask::NONE;

        if self.config.cell_location_enabled() && event.cell_point.is_none() {
            if let (Some(locator), Some(cell)) = (&self.collaborators.cell_locator, &event.cell_tower) {
                match locator.try_locate(cell) {
                    Lookup::Ready(point) => {
                        if in_order && state.serving_cell.as_ref() != Some(cell) {
                            state.serving_cell = Some(cell.clone());
                        }
                        event.cell_point = Some(point);
                    }
                    Lookup::Slow => mask |= EnrichmentMask::CELL_LOCATION,
                    Lookup::Unavailable => {}
                }
            }
        }

        if self.config.reverse_geocode_enabled() && event.address.is_none() {
            // without a location the address follows the serving-cell update
            if let (Some(geocoder), Some(point)) = (&self.collaborators.geocoder, event.best_point()) {
                match geocoder.try_address(&point) {
                    Lookup::Ready(address) => event.address = Some(address),
                    Lookup::Slow => mask |= EnrichmentMask::ADDRESS,
                    Lookup::Unavailable => {}
                }
            }
        }
        mask
    }

    /// Persist the changed asset fields and cache the new state.
    ///
    /// A failed write keeps the fields pending for the next write of that asset.
    fn commit_state(&mut self, original: &AssetState, state: AssetState) {
        let mut fields = state.changed_fields(original);
        if let Some(pending) = self.unsaved.remove(&state.asset_id) {
            for field in pending {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }

        if !fields.is_empty() {
            if let Err(e) = self.collaborators.store.update_asset(&state, &fields) {
                warn!(asset = %state.asset_id, fields = %fields.len(), error = %e, "asset_update_failed");
                self.unsaved.insert(state.asset_id.clone(), fields);
            }
        }
        self.assets.insert(state.asset_id.clone(), state);
    }
}
