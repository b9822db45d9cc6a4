//! Shared types for the ingestion pipeline

use crate::domain::geo::GeoPoint;
use crate::domain::status::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamps at or above this are milliseconds passed where seconds were expected
pub const MAX_REASONABLE_TIMESTAMP: i64 = 5_000_000_000;

/// Current epoch seconds
#[inline]
pub fn epoch_sec() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Newtype wrapper for asset (device) IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serving cell tower identity as reported by the device modem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellTower {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u32,
    pub cid: u32,
}

impl std::fmt::Display for CellTower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}-{}", self.mcc, self.mnc, self.lac, self.cid)
    }
}

/// Primary key of a stored event: one row per (asset, timestamp, status code)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EventKey {
    pub account_id: String,
    pub asset_id: AssetId,
    pub timestamp: i64,
    pub status_code: StatusCode,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}#{}", self.account_id, self.asset_id, self.timestamp, self.status_code)
    }
}

/// Event columns that enrichment may amend after the initial save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventField {
    Address,
    CellPoint,
}

/// A single telemetry report from a tracked asset.
///
/// Optional fields distinguish "not provided" (`None`) from a real value,
/// including a real zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(default)]
    pub account_id: String,
    pub asset_id: AssetId,
    /// Epoch seconds
    pub timestamp: i64,
    pub status_code: StatusCode,
    #[serde(default)]
    pub point: Option<GeoPoint>,
    #[serde(default)]
    pub speed_kph: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub odometer_km: Option<f64>,
    /// GPS-estimated trip distance, filled by the pipeline
    #[serde(default)]
    pub distance_km: Option<f64>,
    /// Fuel level as a fraction 0.0..=1.0
    #[serde(default)]
    pub fuel_level: Option<f64>,
    #[serde(default)]
    pub engine_hours: Option<f64>,
    #[serde(default)]
    pub ignition_hours: Option<f64>,
    #[serde(default)]
    pub fault_code: Option<String>,
    #[serde(default)]
    pub input_mask: Option<u32>,
    #[serde(default)]
    pub output_mask: Option<u32>,
    #[serde(default)]
    pub cell_tower: Option<CellTower>,
    #[serde(default)]
    pub cell_point: Option<GeoPoint>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub geozone_id: Option<String>,
    /// Generated by the pipeline rather than received from the asset
    #[serde(default)]
    pub synthesized: bool,
}

impl TelemetryEvent {
    pub fn new(asset_id: AssetId, timestamp: i64, status_code: StatusCode) -> Self {
        Self {
            account_id: String::new(),
            asset_id,
            timestamp,
            status_code,
            point: None,
            speed_kph: 0.0,
            heading: 0.0,
            odometer_km: None,
            distance_km: None,
            fuel_level: None,
            engine_hours: None,
            ignition_hours: None,
            fault_code: None,
            input_mask: None,
            output_mask: None,
            cell_tower: None,
            cell_point: None,
            address: None,
            geozone_id: None,
            synthesized: false,
        }
    }

    pub fn with_account(mut self, account_id: &str) -> Self {
        self.account_id = account_id.to_string();
        self
    }

    pub fn with_point(mut self, lat: f64, lon: f64) -> Self {
        self.point = Some(GeoPoint::new(lat, lon));
        self
    }

    pub fn with_speed(mut self, speed_kph: f64) -> Self {
        self.speed_kph = speed_kph;
        self
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            account_id: self.account_id.clone(),
            asset_id: self.asset_id.clone(),
            timestamp: self.timestamp,
            status_code: self.status_code,
        }
    }

    /// The GPS fix, if present and valid
    #[inline]
    pub fn valid_point(&self) -> Option<GeoPoint> {
        self.point.filter(GeoPoint::is_valid)
    }

    /// Best known location: GPS fix first, then cell-derived location
    pub fn best_point(&self) -> Option<GeoPoint> {
        self.valid_point().or(self.cell_point.filter(GeoPoint::is_valid))
    }

    /// Derive a pipeline-generated event from this one, sharing its location and counters
    pub fn synthesize(&self, timestamp: i64, status_code: StatusCode) -> TelemetryEvent {
        TelemetryEvent {
            timestamp,
            status_code,
            fault_code: None,
            input_mask: None,
            output_mask: None,
            geozone_id: None,
            synthesized: true,
            ..self.clone()
        }
    }
}
