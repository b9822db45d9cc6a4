//! Reverse-geocode and cell-tower-location collaborators
//!
//! Each provider has a non-blocking probe (`try_*`) used on the ingest path and
//! an async lookup used by enrichment workers. `Lookup::Slow` is not an error:
//! it asks the caller to defer the lookup to the worker pool.

use crate::domain::error::LookupError;
use crate::domain::geo::GeoPoint;
use crate::domain::types::CellTower;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Outcome of a fast-path provider probe
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Ready(T),
    /// Answering would block; defer to the enrichment workers
    Slow,
    /// Provider cannot answer this request
    Unavailable,
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    fn try_address(&self, point: &GeoPoint) -> Lookup<String>;

    async fn address(&self, point: &GeoPoint) -> Result<Option<String>, LookupError>;
}

#[async_trait]
pub trait CellLocator: Send + Sync {
    fn try_locate(&self, cell: &CellTower) -> Lookup<GeoPoint>;

    async fn locate(&self, cell: &CellTower) -> Result<Option<GeoPoint>, LookupError>;
}

/// Cache key: coordinates rounded to ~1 m
fn point_key(point: &GeoPoint) -> (i64, i64) {
    ((point.lat * 1e5).round() as i64, (point.lon * 1e5).round() as i64)
}

fn build_client(timeout_ms: u64) -> Option<reqwest::Client> {
    reqwest::Client::builder().timeout(Duration::from_millis(timeout_ms)).build().ok()
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationResponse {
    lat: f64,
    lon: f64,
}

/// HTTP reverse geocoder: `GET {url}?lat=..&lon=..` returning `{"address": ".."}`
pub struct HttpGeocoder {
    url: String,
    http_client: Option<reqwest::Client>,
    cache: RwLock<FxHashMap<(i64, i64), String>>,
}

impl HttpGeocoder {
    pub fn new(url: &str, timeout_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            http_client: build_client(timeout_ms),
            cache: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl ReverseGeocoder for HttpGeocoder {
    fn try_address(&self, point: &GeoPoint) -> Lookup<String> {
        if self.http_client.is_none() {
            return Lookup::Unavailable;
        }
        match self.cache.read().get(&point_key(point)) {
            Some(address) => Lookup::Ready(address.clone()),
            None => Lookup::Slow,
        }
    }

    async fn address(&self, point: &GeoPoint) -> Result<Option<String>, LookupError> {
        let Some(client) = &self.http_client else {
            return Ok(None);
        };
        let response = client
            .get(&self.url)
            .query(&[("lat", point.lat), ("lon", point.lon)])
            .send()
            .await?
            .error_for_status()?;
        let body: AddressResponse = response.json().await?;
        let address = body.address.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        if let Some(address) = &address {
            debug!(lat = %point.lat, lon = %point.lon, address = %address, "address_resolved");
            self.cache.write().insert(point_key(point), address.clone());
        }
        Ok(address)
    }
}

/// HTTP cell locator: `GET {url}?mcc=..&mnc=..&lac=..&cid=..` returning `{"lat":..,"lon":..}`
pub struct HttpCellLocator {
    url: String,
    http_client: Option<reqwest::Client>,
    cache: RwLock<FxHashMap<CellTower, GeoPoint>>,
}

impl HttpCellLocator {
    pub fn new(url: &str, timeout_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            http_client: build_client(timeout_ms),
            cache: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl CellLocator for HttpCellLocator {
    fn try_locate(&self, cell: &CellTower) -> Lookup<GeoPoint> {
        if self.http_client.is_none() {
            return Lookup::Unavailable;
        }
        match self.cache.read().get(cell) {
            Some(point) => Lookup::Ready(*point),
            None => Lookup::Slow,
        }
    }

    async fn locate(&self, cell: &CellTower) -> Result<Option<GeoPoint>, LookupError> {
        let Some(client) = &self.http_client else {
            return Ok(None);
        };
        let response = client
            .get(&self.url)
            .query(&[
                ("mcc", cell.mcc as u32),
                ("mnc", cell.mnc as u32),
                ("lac", cell.lac),
                ("cid", cell.cid),
            ])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: LocationResponse = response.error_for_status()?.json().await?;
        let point = GeoPoint::new(body.lat, body.lon);
        if !point.is_valid() {
            return Err(LookupError::BadResponse(format!("invalid location for cell {}", cell)));
        }
        debug!(cell = %cell, lat = %point.lat, lon = %point.lon, "cell_located");
        self.cache.write().insert(cell.clone(), point);
        Ok(Some(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_key_rounds() {
        assert_eq!(point_key(&GeoPoint::new(40.123451, -105.0)), point_key(&GeoPoint::new(40.123449, -105.0)));
        assert_ne!(point_key(&GeoPoint::new(40.1234, -105.0)), point_key(&GeoPoint::new(40.1235, -105.0)));
    }

    #[test]
    fn test_uncached_is_slow_cached_is_ready() {
        let geocoder = HttpGeocoder::new("http://127.0.0.1:9/reverse", 100);
        let point = GeoPoint::new(40.0, -105.0);
        assert_eq!(geocoder.try_address(&point), Lookup::Slow);

        geocoder.cache.write().insert(point_key(&point), "Depot Rd".to_string());
        assert_eq!(geocoder.try_address(&point), Lookup::Ready("Depot Rd".to_string()));
    }

    #[test]
    fn test_cell_cache() {
        let locator = HttpCellLocator::new("http://127.0.0.1:9/cell", 100);
        let cell = CellTower { mcc: 310, mnc: 410, lac: 7, cid: 1234 };
        assert_eq!(locator.try_locate(&cell), Lookup::Slow);
        locator.cache.write().insert(cell.clone(), GeoPoint::new(1.0, 2.0));
        assert_eq!(locator.try_locate(&cell), Lookup::Ready(GeoPoint::new(1.0, 2.0)));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_error() {
        let geocoder = HttpGeocoder::new("http://127.0.0.1:9/reverse", 200);
        assert!(geocoder.address(&GeoPoint::new(40.0, -105.0)).await.is_err());
    }
}
