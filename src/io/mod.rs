//! IO modules - external collaborator interfaces
//!
//! This module contains the contracts the pipeline calls out through and
//! their concrete adapters:
//! - `store` - Event and asset-state persistence (in-memory adapter)
//! - `rules` - Rule engine contract and config-backed engine
//! - `geocoder` - Reverse-geocode and cell-location providers (HTTP)
//! - `notifier` - Email/SMS delivery contract and recipient directory
//! - `outbox` - Delivery output to file (JSONL format)
//! - `geozones` - Zone resolution per asset
//! - `replay` - JSONL telemetry source for the binary

pub mod geocoder;
pub mod geozones;
pub mod notifier;
pub mod outbox;
pub mod replay;
pub mod rules;
pub mod store;

// Re-export commonly used types
pub use geocoder::{CellLocator, HttpCellLocator, HttpGeocoder, Lookup, ReverseGeocoder};
pub use geozones::{GeozoneDirectory, StaticGeozoneDirectory};
pub use notifier::{ChannelNotifier, ConfigRecipients, Delivery, Notifier, RecipientDirectory};
pub use outbox::{create_outbox, OutboxWriter};
pub use replay::{replay_file, ReplayStats};
pub use rules::{ActionMask, ConfigRuleEngine, RuleEngine, RuleOutcome};
pub use store::{EventStore, MemoryStore};
