//! Storage collaborator
//!
//! The pipeline needs only "insert event", "amend event columns", "point read
//! asset" and "upsert asset columns". `MemoryStore` is the in-process adapter.

use crate::domain::asset::{AssetField, AssetState};
use crate::domain::error::StoreError;
use crate::domain::types::{AssetId, EventField, EventKey, TelemetryEvent};
use crate::infra::config::AssetSeed;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub trait EventStore: Send + Sync {
    /// Insert a new event; an existing key is a `Duplicate` error
    fn save_event(&self, event: &TelemetryEvent) -> Result<(), StoreError>;

    /// Overwrite the listed columns of an already stored event
    fn update_event(&self, event: &TelemetryEvent, fields: &[EventField]) -> Result<(), StoreError>;

    fn load_asset(&self, asset_id: &AssetId) -> Result<Option<AssetState>, StoreError>;

    /// Upsert the listed columns of an asset record
    fn update_asset(&self, state: &AssetState, fields: &[AssetField]) -> Result<(), StoreError>;
}

/// In-memory event and asset tables
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<FxHashMap<EventKey, TelemetryEvent>>,
    assets: RwLock<FxHashMap<AssetId, AssetState>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate asset records (account, notification settings)
    pub fn with_assets(seeds: &[AssetSeed]) -> Self {
        let store = Self::new();
        {
            let mut assets = store.assets.write();
            for seed in seeds {
                let id = AssetId::new(seed.id.as_str());
                let mut state = AssetState::new(id.clone(), &seed.account);
                state.notify_email = seed.notify_email.clone();
                state.notify_selector = seed.notify_selector.clone();
                assets.insert(id, state);
            }
        }
        store
    }

    /// Make every write fail with `Unavailable` (outage simulation)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn event(&self, key: &EventKey) -> Option<TelemetryEvent> {
        self.events.read().get(key).cloned()
    }

    /// Stored events of one asset, oldest first
    pub fn events_for(&self, asset_id: &AssetId) -> Vec<TelemetryEvent> {
        let mut events: Vec<TelemetryEvent> = self
            .events
            .read()
            .values()
            .filter(|e| &e.asset_id == asset_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.timestamp, e.status_code.0));
        events
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn asset(&self, asset_id: &AssetId) -> Option<AssetState> {
        self.assets.read().get(asset_id).cloned()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.read().len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl EventStore for MemoryStore {
    fn save_event(&self, event: &TelemetryEvent) -> Result<(), StoreError> {
        self.check_available()?;
        let key = event.key();
        let mut events = self.events.write();
        if events.contains_key(&key) {
            return Err(StoreError::Duplicate(key));
        }
        debug!(key = %key, "event_saved");
        events.insert(key, event.clone());
        Ok(())
    }

    fn update_event(&self, event: &TelemetryEvent, fields: &[EventField]) -> Result<(), StoreError> {
        self.check_available()?;
        let key = event.key();
        let mut events = self.events.write();
        let stored = events.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        for field in fields {
            match field {
                EventField::Address => stored.address = event.address.clone(),
                EventField::CellPoint => stored.cell_point = event.cell_point,
            }
        }
        Ok(())
    }

    fn load_asset(&self, asset_id: &AssetId) -> Result<Option<AssetState>, StoreError> {
        Ok(self.asset(asset_id))
    }

    fn update_asset(&self, state: &AssetState, fields: &[AssetField]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut assets = self.assets.write();
        match assets.get_mut(&state.asset_id) {
            Some(stored) => stored.copy_fields(state, fields),
            None => {
                let mut stored = AssetState::new(state.asset_id.clone(), &state.account_id);
                stored.notify_email = state.notify_email.clone();
                stored.notify_selector = state.notify_selector.clone();
                stored.copy_fields(state, fields);
                assets.insert(state.asset_id.clone(), stored);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::status::StatusCode;

    fn event(ts: i64) -> TelemetryEvent {
        TelemetryEvent::new(AssetId::new("truck-1"), ts, StatusCode::LOCATION)
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let store = MemoryStore::new();
        store.save_event(&event(100)).unwrap();
        assert!(matches!(store.save_event(&event(100)), Err(StoreError::Duplicate(_))));
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn test_update_event_only_listed_fields() {
        let store = MemoryStore::new();
        let original = event(100);
        store.save_event(&original).unwrap();

        let mut amended = original.clone();
        amended.address = Some("1 Main St".to_string());
        amended.speed_kph = 99.0;
        store.update_event(&amended, &[EventField::Address]).unwrap();

        let stored = store.event(&original.key()).unwrap();
        assert_eq!(stored.address.as_deref(), Some("1 Main St"));
        assert_eq!(stored.speed_kph, 0.0);
    }

    #[test]
    fn test_update_missing_event() {
        let store = MemoryStore::new();
        assert!(matches!(store.update_event(&event(1), &[EventField::Address]), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_update_asset_partial_upsert() {
        let store = MemoryStore::new();
        let mut state = AssetState::new(AssetId::new("truck-1"), "acct");
        state.last_odometer_km = 10.0;
        state.last_event_time = 500;
        store.update_asset(&state, &[AssetField::Odometer]).unwrap();

        let stored = store.asset(&state.asset_id).unwrap();
        assert_eq!(stored.last_odometer_km, 10.0);
        assert_eq!(stored.last_event_time, 0);
    }

    #[test]
    fn test_seeded_assets_and_outage() {
        let seeds = vec![AssetSeed {
            id: "truck-9".to_string(),
            account: "acme".to_string(),
            notify_email: Some("ops@acme.test".to_string()),
            notify_selector: None,
        }];
        let store = MemoryStore::with_assets(&seeds);
        let state = store.load_asset(&AssetId::new("truck-9")).unwrap().unwrap();
        assert_eq!(state.account_id, "acme");

        store.set_fail_writes(true);
        assert!(matches!(store.save_event(&event(1)), Err(StoreError::Unavailable(_))));
    }
}
