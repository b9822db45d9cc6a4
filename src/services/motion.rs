//! Stopped/moving state machine
//!
//! Two states, decided from the asset's last start/stop timestamps:
//! - MOVING (last start > last stop) leaves only on an explicit stop status
//! - STOPPED (last stop > last start) leaves on displacement beyond the start
//!   radius or an explicit start status
//! - undetermined falls back to displacement, then status, then raw speed

use crate::domain::asset::AssetState;
use crate::domain::types::TelemetryEvent;
use crate::infra::config::PipelineConfig;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionChange {
    Unchanged,
    Started,
    Stopped,
}

pub struct MotionTracker {
    start_radius_m: f64,
}

impl MotionTracker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self { start_radius_m: config.motion_start_radius_m() }
    }

    /// Displacement of the event fix from the last valid fix exceeds the start radius
    fn displaced(&self, state: &AssetState, event: &TelemetryEvent) -> bool {
        match (state.last_fix, event.valid_point()) {
            (Some(last), Some(point)) => last.point.distance_m(&point) > self.start_radius_m,
            _ => false,
        }
    }

    /// Apply the event to the asset's motion state, recording transition times
    pub fn update(&self, state: &mut AssetState, event: &TelemetryEvent) -> MotionChange {
        let code = event.status_code;
        let ts = event.timestamp;

        let change = if state.last_start_time > state.last_stop_time {
            if code.is_motion_stop() {
                MotionChange::Stopped
            } else {
                MotionChange::Unchanged
            }
        } else if state.last_stop_time > state.last_start_time {
            if self.displaced(state, event) || code.is_motion_start() {
                MotionChange::Started
            } else {
                MotionChange::Unchanged
            }
        } else if self.displaced(state, event) || code.is_motion_start() {
            MotionChange::Started
        } else if code.is_motion_stop() {
            MotionChange::Stopped
        } else if event.speed_kph > 0.0 {
            MotionChange::Started
        } else {
            MotionChange::Stopped
        };

        match change {
            MotionChange::Started => {
                state.last_start_time = ts;
                debug!(asset = %state.asset_id, ts = %ts, "motion_started");
            }
            MotionChange::Stopped => {
                state.last_stop_time = ts;
                debug!(asset = %state.asset_id, ts = %ts, "motion_stopped");
            }
            MotionChange::Unchanged => {}
        }
        change
    }
}
