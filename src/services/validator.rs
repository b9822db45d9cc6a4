//! Event validation and normalization
//!
//! Runs before any asset state is touched. Rejects impossible timestamps,
//! applies the past/future date and speed policies, and normalizes invalid
//! coordinates and sub-threshold speeds.

use crate::domain::error::RejectReason;
use crate::domain::types::{TelemetryEvent, MAX_REASONABLE_TIMESTAMP};
use crate::infra::config::{DateAction, PipelineConfig, SpeedAction};
use tracing::debug;

/// Validation policy resolved from config
#[derive(Debug, Clone)]
pub struct Validator {
    past_action: DateAction,
    past_max_sec: i64,
    future_action: DateAction,
    future_max_sec: i64,
    speed_action: SpeedAction,
    speed_max_kph: f64,
    min_speed_kph: f64,
}

impl Validator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            past_action: config.past_action(),
            past_max_sec: config.past_max_sec(),
            future_action: config.future_action(),
            future_max_sec: config.future_max_sec(),
            speed_action: config.speed_action(),
            speed_max_kph: config.speed_max_kph(),
            min_speed_kph: config.min_speed_kph(),
        }
    }

    /// Accept (possibly rewriting) or reject the in-flight event
    pub fn validate(&self, event: &mut TelemetryEvent, now: i64) -> Result<(), RejectReason> {
        self.check_timestamp(event, now)?;
        self.check_speed(event)?;
        self.normalize(event);
        Ok(())
    }

    fn check_timestamp(&self, event: &mut TelemetryEvent, now: i64) -> Result<(), RejectReason> {
        let ts = event.timestamp;
        if ts <= 0 || ts >= MAX_REASONABLE_TIMESTAMP {
            return Err(RejectReason::InvalidTimestamp(ts));
        }

        if self.past_action != DateAction::Disabled
            && self.past_max_sec > 0
            && ts < now - self.past_max_sec
        {
            match self.past_action {
                DateAction::Ignore => {
                    return Err(RejectReason::PastTimestamp {
                        timestamp: ts,
                        now,
                        max_sec: self.past_max_sec,
                    });
                }
                DateAction::Truncate => {
                    debug!(asset = %event.asset_id, from = %ts, to = %now, "past_timestamp_truncated");
                    event.timestamp = now;
                }
                DateAction::Disabled => {}
            }
        }

        if self.future_action != DateAction::Disabled
            && self.future_max_sec > 0
            && event.timestamp > now + self.future_max_sec
        {
            match self.future_action {
                DateAction::Ignore => {
                    return Err(RejectReason::FutureTimestamp {
                        timestamp: event.timestamp,
                        now,
                        max_sec: self.future_max_sec,
                    });
                }
                DateAction::Truncate => {
                    debug!(asset = %event.asset_id, from = %event.timestamp, to = %now, "future_timestamp_truncated");
                    event.timestamp = now;
                }
                DateAction::Disabled => {}
            }
        }
        Ok(())
    }

    fn check_speed(&self, event: &mut TelemetryEvent) -> Result<(), RejectReason> {
        if self.speed_action == SpeedAction::Disabled
            || self.speed_max_kph <= 0.0
            || event.speed_kph <= self.speed_max_kph
        {
            return Ok(());
        }
        match self.speed_action {
            SpeedAction::Ignore => {
                return Err(RejectReason::InvalidSpeed {
                    speed_kph: event.speed_kph,
                    max_kph: self.speed_max_kph,
                });
            }
            SpeedAction::Truncate => event.speed_kph = self.speed_max_kph,
            SpeedAction::Zero => event.speed_kph = 0.0,
            SpeedAction::Disabled => {}
        }
        debug!(asset = %event.asset_id, speed_kph = %event.speed_kph, "speed_normalized");
        Ok(())
    }

    fn normalize(&self, event: &mut TelemetryEvent) {
        if event.point.is_some_and(|p| !p.is_valid()) {
            event.point = None;
        }
        if !event.speed_kph.is_finite() || event.speed_kph < 0.0 {
            event.speed_kph = 0.0;
        }
        if self.min_speed_kph > 0.0 && event.speed_kph < self.min_speed_kph {
            event.speed_kph = 0.0;
            event.heading = 0.0;
        }
    }
}
