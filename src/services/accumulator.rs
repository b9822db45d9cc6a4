//! Accumulated vehicle metrics anchored to the asset's last known state
//!
//! - odometer: device value when plausible, else estimated from GPS displacement
//! - engine / ignition hours: on/off run-time counters
//! - events-per-second: exponentially decayed arrival rate
//! - fault codes, digital I/O masks, fuel level
//!
//! Estimation and snapshot updates only happen for in-order events (not older
//! than the newest processed one); fault codes merge regardless of order.

use crate::domain::asset::{AssetState, GpsFix, RuntimeCounter};
use crate::domain::fault::merge_fault_codes;
use crate::domain::status::StatusCode;
use crate::domain::types::TelemetryEvent;
use crate::infra::config::PipelineConfig;
use tracing::debug;

/// Decayed events-per-second estimator.
///
/// `alpha` is derived once so that an event's weight decays by `weight`
/// over `range` milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct EventRate {
    alpha: f64,
}

impl EventRate {
    pub fn new(range_sec: u64, weight: f64) -> Self {
        let weight = if weight > 0.0 && weight < 1.0 { weight } else { 0.5 };
        let range_ms = (range_sec.max(1) * 1000) as f64;
        Self { alpha: 1.0 - ((1.0 - weight).ln() / range_ms).exp() }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Decay factor over `delta_ms` (negative deltas count as zero)
    #[inline]
    fn decay(&self, delta_ms: i64) -> f64 {
        (1.0 - self.alpha).powf(delta_ms.max(0) as f64)
    }

    /// Count one event at `now_ms`
    pub fn record(&self, state: &mut AssetState, now_ms: i64) {
        if state.event_rate_ref_ms <= 0 {
            state.event_rate = self.alpha;
        } else {
            let delta = now_ms - state.event_rate_ref_ms;
            state.event_rate = self.alpha + self.decay(delta) * state.event_rate;
        }
        state.event_rate_ref_ms = state.event_rate_ref_ms.max(now_ms);
    }

    /// Aged estimate (events per millisecond) at `now_ms`, without counting an event
    pub fn rate_at(&self, state: &AssetState, now_ms: i64) -> f64 {
        if state.event_rate_ref_ms <= 0 {
            return 0.0;
        }
        self.decay(now_ms - state.event_rate_ref_ms) * state.event_rate
    }

    /// Aged estimate in events per second
    pub fn events_per_second_at(&self, state: &AssetState, now_ms: i64) -> f64 {
        self.rate_at(state, now_ms) * 1000.0
    }
}

pub struct AccumulatorEngine {
    max_odometer_km: f64,
    never_decrease: bool,
    estimate_odometer: bool,
    max_engine_hours: f64,
    simulate_engine_from_ignition: bool,
    refill_delta: f64,
    theft_delta: f64,
    rate: EventRate,
}

/// Current accumulated hours of an on/off counter at `ts`
fn current_hours(counter: &RuntimeCounter, ts: i64) -> f64 {
    if counter.on_time > 0 && ts > counter.on_time {
        counter.hours_at_on + (ts - counter.on_time) as f64 / 3600.0
    } else if counter.on_time > 0 {
        counter.hours_at_on
    } else {
        counter.hours
    }
}

/// Advance an on/off counter; returns the accumulated hours at `ts`
fn update_runtime(counter: &mut RuntimeCounter, ts: i64, turned_on: bool, turned_off: bool) -> f64 {
    let hours = current_hours(counter, ts);
    if turned_on {
        counter.on_time = ts;
        counter.off_time = 0;
        counter.hours_at_on = hours;
    } else if turned_off {
        counter.off_time = ts;
        counter.on_time = 0;
        counter.hours = hours;
    }
    counter.settle();
    hours
}

impl AccumulatorEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_odometer_km: config.max_odometer_km(),
            never_decrease: config.odometer_never_decrease(),
            estimate_odometer: config.estimate_odometer(),
            max_engine_hours: config.max_engine_hours(),
            simulate_engine_from_ignition: config.simulate_engine_from_ignition(),
            refill_delta: config.fuel_refill_delta(),
            theft_delta: config.fuel_theft_delta(),
            rate: EventRate::new(config.eps_range_sec(), config.eps_weight()),
        }
    }

    pub fn event_rate(&self) -> &EventRate {
        &self.rate
    }

    /// Apply a primary event to the asset state.
    ///
    /// Returns the status of a fuel-level change event to synthesize, if any.
    pub fn apply(
        &self,
        state: &mut AssetState,
        event: &mut TelemetryEvent,
        in_order: bool,
        now_ms: i64,
    ) -> Option<StatusCode> {
        self.rate.record(state, now_ms);
        self.apply_fault(state, event);
        if !in_order {
            self.reject_implausible_odometer(event);
            return None;
        }

        self.apply_odometer(state, event);
        self.apply_runtime(state, event);
        self.apply_digital_io(state, event);
        let fuel_change = self.apply_fuel(state, event);

        if let Some(point) = event.valid_point() {
            state.last_fix = Some(GpsFix {
                point,
                speed_kph: event.speed_kph,
                heading: event.heading,
                timestamp: event.timestamp,
            });
        }
        state.last_event_time = state.last_event_time.max(event.timestamp);
        fuel_change
    }

    fn plausible_odometer(&self, km: f64) -> bool {
        km.is_finite() && km >= 0.0 && km < self.max_odometer_km
    }

    fn reject_implausible_odometer(&self, event: &mut TelemetryEvent) {
        if event.odometer_km.is_some_and(|km| !self.plausible_odometer(km)) {
            event.odometer_km = None;
        }
    }

    fn apply_odometer(&self, state: &mut AssetState, event: &mut TelemetryEvent) {
        let displacement_km = match (state.last_fix, event.valid_point()) {
            (Some(last), Some(point)) => last.point.distance_km(&point),
            _ => 0.0,
        };
        if event.valid_point().is_some() {
            state.last_distance_km += displacement_km;
            event.distance_km = Some(state.last_distance_km);
        }

        self.reject_implausible_odometer(event);
        let candidate = match event.odometer_km {
            Some(km) => Some(km),
            None if self.estimate_odometer && event.valid_point().is_some() => {
                let estimate = state.last_odometer_km + displacement_km;
                event.odometer_km = Some(estimate);
                Some(estimate)
            }
            None => None,
        };

        if let Some(km) = candidate {
            if self.never_decrease && km < state.last_odometer_km {
                debug!(
                    asset = %state.asset_id,
                    odometer_km = %km,
                    last_km = %state.last_odometer_km,
                    "odometer_decrease_ignored"
                );
            } else {
                state.last_odometer_km = km;
            }
        }
    }

    fn apply_runtime(&self, state: &mut AssetState, event: &mut TelemetryEvent) {
        let code = event.status_code;
        let ts = event.timestamp;

        let ignition_hours =
            update_runtime(&mut state.ignition, ts, code.is_ignition_on(), code.is_ignition_off());

        let (engine_on, engine_off) = if self.simulate_engine_from_ignition {
            (code.is_engine_start() || code.is_ignition_on(), code.is_engine_stop() || code.is_ignition_off())
        } else {
            (code.is_engine_start(), code.is_engine_stop())
        };
        let mut engine_hours = update_runtime(&mut state.engine, ts, engine_on, engine_off);

        // device-reported engine hours rebase the counter
        if let Some(hours) = event.engine_hours {
            if hours.is_finite() && hours >= 0.0 && hours < self.max_engine_hours {
                if state.engine.is_on() {
                    state.engine.hours_at_on = hours;
                    state.engine.on_time = ts;
                } else {
                    state.engine.hours = hours;
                }
                engine_hours = hours;
            }
        }

        if state.engine.on_time > 0 || state.engine.hours > 0.0 {
            event.engine_hours = Some(engine_hours);
        }
        if event.ignition_hours.is_none() && (state.ignition.on_time > 0 || state.ignition.hours > 0.0) {
            event.ignition_hours = Some(ignition_hours);
        }
    }

    fn apply_fault(&self, state: &mut AssetState, event: &TelemetryEvent) {
        if let Some(fault) = event.fault_code.as_deref().filter(|f| !f.trim().is_empty()) {
            state.last_fault_code = Some(merge_fault_codes(state.last_fault_code.as_deref(), fault));
        }
    }

    fn apply_digital_io(&self, state: &mut AssetState, event: &TelemetryEvent) {
        if event.input_mask.is_some() {
            state.last_input_mask = event.input_mask;
        }
        if event.output_mask.is_some() {
            state.last_output_mask = event.output_mask;
        }
    }

    fn apply_fuel(&self, state: &mut AssetState, event: &TelemetryEvent) -> Option<StatusCode> {
        let level = event.fuel_level.filter(|l| l.is_finite() && *l >= 0.0)?;
        let previous = state.last_fuel_level.replace(level)?;
        let code = event.status_code;
        if code == StatusCode::FUEL_REFILL || code == StatusCode::FUEL_THEFT {
            return None;
        }
        let delta = level - previous;
        if self.refill_delta > 0.0 && delta >= self.refill_delta {
            Some(StatusCode::FUEL_REFILL)
        } else if self.theft_delta > 0.0 && -delta >= self.theft_delta {
            Some(StatusCode::FUEL_THEFT)
        } else {
            None
        }
    }
}
