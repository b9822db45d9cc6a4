//! Geozone arrive/depart detection
//!
//! Compares the zone of the asset's previous valid fix with the zone of the
//! new fix. Only evaluated for valid fixes newer than the last processed
//! event; older events never produce transitions.

use crate::domain::asset::AssetState;
use crate::domain::geozone::{Geozone, GeozoneTransition, TransitionKind};
use crate::domain::types::TelemetryEvent;
use crate::io::geozones::GeozoneDirectory;
use smallvec::SmallVec;
use tracing::debug;

/// At most one departure and one arrival per event
pub type Transitions = SmallVec<[GeozoneTransition; 2]>;

pub struct GeozoneDetector;

impl GeozoneDetector {
    /// Transitions caused by `event`, DEPART (at t-2) before ARRIVE (at t-1).
    ///
    /// `state` must be the snapshot before the event is accumulated, and
    /// `new_zone` the resolved zone of the event's fix.
    pub fn detect(
        directory: &dyn GeozoneDirectory,
        state: &AssetState,
        event: &TelemetryEvent,
        new_zone: Option<&Geozone>,
    ) -> Transitions {
        let mut transitions = Transitions::new();
        if event.valid_point().is_none() || event.timestamp <= state.last_event_time {
            return transitions;
        }

        let prev_zone = state
            .last_fix
            .filter(|fix| fix.point.is_valid())
            .and_then(|fix| directory.zone_at(&state.account_id, &state.asset_id, &fix.point));

        let ts = event.timestamp;
        match (prev_zone.as_ref(), new_zone) {
            (Some(prev), Some(new)) if prev.id == new.id => {}
            (None, None) => {}
            (prev, new) => {
                if let Some(prev) = prev.filter(|z| z.departure) {
                    transitions.push(GeozoneTransition {
                        timestamp: ts - 2,
                        kind: TransitionKind::Depart,
                        zone: prev.clone(),
                    });
                }
                if let Some(new) = new.filter(|z| z.arrival) {
                    transitions.push(GeozoneTransition {
                        timestamp: ts - 1,
                        kind: TransitionKind::Arrive,
                        zone: new.clone(),
                    });
                }
            }
        }

        for t in &transitions {
            debug!(
                asset = %state.asset_id,
                zone = %t.zone.id,
                kind = %t.kind.as_str(),
                ts = %t.timestamp,
                "geozone_transition"
            );
        }
        transitions
    }
}
