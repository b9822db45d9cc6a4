//! Domain models - core data types of the ingestion pipeline
//!
//! This module contains the canonical data types used throughout the system:
//! - `TelemetryEvent` - a report from a tracked asset
//! - `AssetState` - the per-asset last-known-state snapshot
//! - `Geozone` - named regions and the transitions detected across them
//! - `StatusCode` - classification of telemetry events
//! - fault-code sets and geographic primitives

pub mod asset;
pub mod error;
pub mod fault;
pub mod geo;
pub mod geozone;
pub mod status;
pub mod types;

// Re-export commonly used types at module level
pub use asset::{AssetField, AssetState, GpsFix, RuntimeCounter};
pub use geo::GeoPoint;
pub use geozone::{Geozone, GeozoneTransition, TransitionKind, ZoneShape};
pub use status::StatusCode;
pub use types::{AssetId, CellTower, EventField, EventKey, TelemetryEvent};
