//! Geographic primitives: points, great-circle distance, zone geometry tests

use serde::{Deserialize, Serialize};

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// A fix is valid when finite, in range, and not the 0/0 "no fix" marker
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && !(self.lat == 0.0 && self.lon == 0.0)
    }

    /// Haversine distance in kilometers
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }

    #[inline]
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        self.distance_km(other) * 1000.0
    }

    /// Project onto a local tangent plane (km) centered at `origin`
    fn project_km(&self, origin: &GeoPoint) -> (f64, f64) {
        let km_per_deg = EARTH_RADIUS_KM.to_radians();
        let x = (self.lon - origin.lon) * km_per_deg * origin.lat.to_radians().cos();
        let y = (self.lat - origin.lat) * km_per_deg;
        (x, y)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5}/{:.5}", self.lat, self.lon)
    }
}

/// True if `p` lies within `radius_km` of any of `centers`
pub fn within_any_radius(p: &GeoPoint, centers: &[GeoPoint], radius_km: f64) -> bool {
    centers.iter().filter(|c| c.is_valid()).any(|c| c.distance_km(p) <= radius_km)
}

/// Bounding rectangle spanned by `corners`, with a small tolerance on each edge.
/// Does not handle zones spanning the antimeridian.
pub fn within_bounds(p: &GeoPoint, corners: &[GeoPoint], tolerance_deg: f64) -> bool {
    if corners.len() < 2 {
        return false;
    }
    let (mut north, mut south, mut east, mut west) = (-90.0f64, 90.0f64, -180.0f64, 180.0f64);
    for c in corners {
        north = north.max(c.lat);
        south = south.min(c.lat);
        east = east.max(c.lon);
        west = west.min(c.lon);
    }
    p.lat <= north + tolerance_deg
        && p.lat >= south - tolerance_deg
        && p.lon >= west - tolerance_deg
        && p.lon <= east + tolerance_deg
}

/// Distance (km) from `p` to the segment `a`-`b`, on a local plane around `p`
pub fn distance_to_segment_km(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (ax, ay) = a.project_km(p);
    let (bx, by) = b.project_km(p);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (ax * ax + ay * ay).sqrt();
    }
    // p is the origin, so the projection parameter is -(a . d) / |d|^2
    let t = (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0);
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

/// True if `p` lies within `radius_km` of the polyline through `path`
pub fn within_swept_radius(p: &GeoPoint, path: &[GeoPoint], radius_km: f64) -> bool {
    match path {
        [] => false,
        [single] => single.distance_km(p) <= radius_km,
        _ => path.windows(2).any(|w| distance_to_segment_km(p, &w[0], &w[1]) <= radius_km),
    }
}

/// Ray-casting point-in-polygon test (vertices in order, implicitly closed)
pub fn within_polygon(p: &GeoPoint, vertices: &[GeoPoint]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (vi, vj) = (&vertices[i], &vertices[j]);
        if (vi.lat > p.lat) != (vj.lat > p.lat) {
            let cross_lon = (vj.lon - vi.lon) * (p.lat - vi.lat) / (vj.lat - vi.lat) + vi.lon;
            if p.lon < cross_lon {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
