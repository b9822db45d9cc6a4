//! Geozone definitions and transition value objects

use crate::domain::geo::{self, GeoPoint};
use crate::domain::status::StatusCode;
use serde::{Deserialize, Serialize};

/// Extra radius granted to zones detected client-side, to avoid edge flapping
pub const CLIENT_RADIUS_DELTA_M: f64 = 7.0;
/// Edge tolerance for bounded rectangles, in degrees
pub const CLIENT_GEOPOINT_DELTA: f64 = 0.00007;

/// Zone geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneShape {
    /// Inside if within `radius_m` of any center
    PointRadius { centers: Vec<GeoPoint>, radius_m: f64 },
    /// Inside the rectangle spanned by the corners
    BoundedRect { corners: Vec<GeoPoint> },
    /// Inside if within `radius_m` of the polyline (corridor)
    SweptPointRadius { path: Vec<GeoPoint>, radius_m: f64 },
    Polygon { vertices: Vec<GeoPoint> },
}

/// A named region with notification and corridor semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geozone {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub shape: ZoneShape,
    /// Higher wins when zones overlap
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Blank means the zone applies to every asset
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default = "default_true")]
    pub arrival: bool,
    #[serde(default = "default_true")]
    pub departure: bool,
    #[serde(default)]
    pub auto_notify: bool,
    #[serde(default)]
    pub reverse_geocode: bool,
    #[serde(default)]
    pub client_upload: bool,
    #[serde(default)]
    pub corridor_id: Option<String>,
    #[serde(default)]
    pub corridor_start: bool,
    #[serde(default)]
    pub corridor_end: bool,
}

fn default_true() -> bool {
    true
}

impl Geozone {
    pub fn contains(&self, p: &GeoPoint) -> bool {
        if !p.is_valid() {
            return false;
        }
        let delta_km = if self.client_upload { CLIENT_RADIUS_DELTA_M / 1000.0 } else { 0.0 };
        match &self.shape {
            ZoneShape::PointRadius { centers, radius_m } => {
                geo::within_any_radius(p, centers, radius_m / 1000.0 + delta_km)
            }
            ZoneShape::BoundedRect { corners } => {
                geo::within_bounds(p, corners, CLIENT_GEOPOINT_DELTA)
            }
            ZoneShape::SweptPointRadius { path, radius_m } => {
                geo::within_swept_radius(p, path, radius_m / 1000.0 + delta_km)
            }
            ZoneShape::Polygon { vertices } => geo::within_polygon(p, vertices),
        }
    }

    /// Display name: description when set, else the id
    pub fn name(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }

    pub fn has_corridor(&self) -> bool {
        self.corridor_id.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Arrive,
    Depart,
}

impl TransitionKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            TransitionKind::Arrive => StatusCode::GEOFENCE_ARRIVE,
            TransitionKind::Depart => StatusCode::GEOFENCE_DEPART,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Arrive => "arrive",
            TransitionKind::Depart => "depart",
        }
    }
}

/// A detected zone crossing, turned into a synthesized event by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct GeozoneTransition {
    pub timestamp: i64,
    pub kind: TransitionKind,
    pub zone: Geozone,
}
