//! Last-known-state snapshot per tracked asset
//!
//! The pipeline is the single writer of an `AssetState`; enrichment workers
//! never touch it directly (see `services::enrichment::AssetUpdate`).

use crate::domain::geo::GeoPoint;
use crate::domain::types::{AssetId, CellTower};
use serde::{Deserialize, Serialize};

/// Last valid GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub point: GeoPoint,
    pub speed_kph: f64,
    pub heading: f64,
    pub timestamp: i64,
}

/// Run-time accumulator for an on/off circuit (engine or ignition).
///
/// At most one of `on_time`/`off_time` is non-zero after `settle()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeCounter {
    pub on_time: i64,
    pub off_time: i64,
    /// Hours committed at the last "off" (or device-reported value)
    pub hours: f64,
    /// Hours baseline captured at the last "on"
    pub hours_at_on: f64,
}

impl RuntimeCounter {
    /// True if the most recent transition was "on"
    #[inline]
    pub fn is_on(&self) -> bool {
        self.on_time > 0 && self.on_time > self.off_time
    }

    /// Zero whichever of on/off time is older
    pub fn settle(&mut self) {
        if self.on_time > 0 && self.off_time > 0 {
            if self.on_time >= self.off_time {
                self.off_time = 0;
            } else {
                self.on_time = 0;
            }
        }
    }
}

/// Asset state columns, for partial ("upsert these fields") persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetField {
    LastEventTime,
    LastFix,
    Odometer,
    Distance,
    Engine,
    Ignition,
    Motion,
    FaultCode,
    DigitalIo,
    FuelLevel,
    Corridor,
    EventRate,
    Notify,
    ServingCell,
}

impl AssetField {
    pub const ALL: [AssetField; 14] = [
        AssetField::LastEventTime,
        AssetField::LastFix,
        AssetField::Odometer,
        AssetField::Distance,
        AssetField::Engine,
        AssetField::Ignition,
        AssetField::Motion,
        AssetField::FaultCode,
        AssetField::DigitalIo,
        AssetField::FuelLevel,
        AssetField::Corridor,
        AssetField::EventRate,
        AssetField::Notify,
        AssetField::ServingCell,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetState {
    pub asset_id: AssetId,
    pub account_id: String,
    /// Timestamp of the newest event processed so far
    pub last_event_time: i64,
    pub last_fix: Option<GpsFix>,
    pub last_odometer_km: f64,
    pub last_distance_km: f64,
    pub engine: RuntimeCounter,
    pub ignition: RuntimeCounter,
    pub last_stop_time: i64,
    pub last_start_time: i64,
    pub last_fault_code: Option<String>,
    pub last_input_mask: Option<u32>,
    pub last_output_mask: Option<u32>,
    pub last_fuel_level: Option<f64>,
    pub active_corridor: Option<String>,
    /// Decayed events-per-millisecond estimate
    pub event_rate: f64,
    /// Epoch milliseconds of the last `event_rate` update
    pub event_rate_ref_ms: i64,
    pub last_notify_time: i64,
    pub last_notify_code: Option<u32>,
    pub last_notify_rule: Option<String>,
    pub serving_cell: Option<CellTower>,
    /// Per-asset selector evaluated before the general rule set
    #[serde(default)]
    pub notify_selector: Option<String>,
    /// Comma separated notification recipients for this asset
    #[serde(default)]
    pub notify_email: Option<String>,
}

impl AssetState {
    pub fn new(asset_id: AssetId, account_id: &str) -> Self {
        Self {
            asset_id,
            account_id: account_id.to_string(),
            last_event_time: 0,
            last_fix: None,
            last_odometer_km: 0.0,
            last_distance_km: 0.0,
            engine: RuntimeCounter::default(),
            ignition: RuntimeCounter::default(),
            last_stop_time: 0,
            last_start_time: 0,
            last_fault_code: None,
            last_input_mask: None,
            last_output_mask: None,
            last_fuel_level: None,
            active_corridor: None,
            event_rate: 0.0,
            event_rate_ref_ms: 0,
            last_notify_time: 0,
            last_notify_code: None,
            last_notify_rule: None,
            serving_cell: None,
            notify_selector: None,
            notify_email: None,
        }
    }

    /// True if the asset's latest motion transition was a start
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.last_start_time > self.last_stop_time
    }

    /// Copy the listed columns from `src`
    pub fn copy_fields(&mut self, src: &AssetState, fields: &[AssetField]) {
        for field in fields {
            match field {
                AssetField::LastEventTime => self.last_event_time = src.last_event_time,
                AssetField::LastFix => self.last_fix = src.last_fix,
                AssetField::Odometer => self.last_odometer_km = src.last_odometer_km,
                AssetField::Distance => self.last_distance_km = src.last_distance_km,
                AssetField::Engine => self.engine = src.engine,
                AssetField::Ignition => self.ignition = src.ignition,
                AssetField::Motion => {
                    self.last_stop_time = src.last_stop_time;
                    self.last_start_time = src.last_start_time;
                }
                AssetField::FaultCode => self.last_fault_code = src.last_fault_code.clone(),
                AssetField::DigitalIo => {
                    self.last_input_mask = src.last_input_mask;
                    self.last_output_mask = src.last_output_mask;
                }
                AssetField::FuelLevel => self.last_fuel_level = src.last_fuel_level,
                AssetField::Corridor => self.active_corridor = src.active_corridor.clone(),
                AssetField::EventRate => {
                    self.event_rate = src.event_rate;
                    self.event_rate_ref_ms = src.event_rate_ref_ms;
                }
                AssetField::Notify => {
                    self.last_notify_time = src.last_notify_time;
                    self.last_notify_code = src.last_notify_code;
                    self.last_notify_rule = src.last_notify_rule.clone();
                }
                AssetField::ServingCell => self.serving_cell = src.serving_cell.clone(),
            }
        }
    }

    /// Columns that differ between `self` and `other`
    pub fn changed_fields(&self, other: &AssetState) -> Vec<AssetField> {
        AssetField::ALL
            .iter()
            .copied()
            .filter(|field| {
                let mut probe = other.clone();
                probe.copy_fields(self, &[*field]);
                probe != *other
            })
            .collect()
    }
}
