//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `pipeline` - Central event orchestrator and asset state owner
//! - `validator` - Timestamp/speed policies and normalization
//! - `motion` - Moving/stopped state machine
//! - `accumulator` - Odometer, runtime, I/O, fuel and event-rate bookkeeping
//! - `geozone_detector` - Arrive/depart detection
//! - `enrichment` - Deferred address and cell-location lookups
//! - `notify` - Rule evaluation and zone auto-notify

pub mod accumulator;
pub mod enrichment;
pub mod geozone_detector;
pub mod motion;
pub mod notify;
pub mod pipeline;
pub mod validator;

// Re-export commonly used types
pub use enrichment::{create_enrichment_worker, AssetUpdate, EnrichmentDispatcher, EnrichmentMask, EnrichmentSender};
pub use pipeline::{Collaborators, IngestOutcome, Pipeline};
