//! Geozone-management collaborator
//!
//! Resolves the zone an asset is in: highest priority first, inactive zones
//! skipped, and zones bound to a group apply only to that group's members.

use crate::domain::geo::GeoPoint;
use crate::domain::geozone::Geozone;
use crate::domain::types::AssetId;
use crate::infra::config::GroupConfig;
use rustc_hash::{FxHashMap, FxHashSet};

pub trait GeozoneDirectory: Send + Sync {
    /// The zone applicable to `asset_id` that contains `point`, if any
    fn zone_at(&self, account_id: &str, asset_id: &AssetId, point: &GeoPoint) -> Option<Geozone>;
}

/// Zones and groups loaded once from config
pub struct StaticGeozoneDirectory {
    /// Sorted by descending priority
    zones: Vec<Geozone>,
    groups: FxHashMap<String, FxHashSet<AssetId>>,
}

/// Blank or "all" group means every asset
fn applies_to_all(group_id: Option<&str>) -> bool {
    match group_id.map(str::trim) {
        None => true,
        Some(g) => g.is_empty() || g.eq_ignore_ascii_case("all"),
    }
}

impl StaticGeozoneDirectory {
    pub fn new(zones: &[Geozone], groups: &[GroupConfig]) -> Self {
        let mut zones = zones.to_vec();
        // stable: equal priorities keep config order
        zones.sort_by(|a, b| b.priority.cmp(&a.priority));
        let groups = groups
            .iter()
            .map(|g| (g.id.clone(), g.assets.iter().map(|a| AssetId::new(a.as_str())).collect()))
            .collect();
        Self { zones, groups }
    }

    fn applies_to(&self, zone: &Geozone, asset_id: &AssetId) -> bool {
        if applies_to_all(zone.group_id.as_deref()) {
            return true;
        }
        zone.group_id
            .as_deref()
            .and_then(|g| self.groups.get(g.trim()))
            .is_some_and(|members| members.contains(asset_id))
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl GeozoneDirectory for StaticGeozoneDirectory {
    fn zone_at(&self, _account_id: &str, asset_id: &AssetId, point: &GeoPoint) -> Option<Geozone> {
        self.zones
            .iter()
            .filter(|z| z.active && self.applies_to(z, asset_id))
            .find(|z| z.contains(point))
            .cloned()
    }
}
