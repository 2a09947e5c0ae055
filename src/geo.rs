use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6_371.0088;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn in_bounds(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Great-circle distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Canonical form of a category label, shared by cache keys and search
/// URLs: trimmed, lowercased, inner whitespace collapsed to `+`.
pub fn canonical_category(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("+")
}

/// Quantized (location, category) fingerprint used as the cache
/// coordinate. Two centers inside the same grid cell with the same
/// category produce identical keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoKey {
    pub lat_bucket: i64,
    pub lon_bucket: i64,
    pub category: String,
}

impl GeoKey {
    pub fn compute(center: GeoPoint, category: &str, bucket_deg: f64) -> Self {
        Self {
            lat_bucket: (center.lat / bucket_deg).floor() as i64,
            lon_bucket: (center.lon / bucket_deg).floor() as i64,
            category: canonical_category(category),
        }
    }

    /// This key plus its eight surrounding buckets, so near-boundary
    /// centers still meet their neighbors during lookup.
    pub fn neighborhood(&self) -> Vec<GeoKey> {
        let mut keys = Vec::with_capacity(9);
        for d_lat in -1..=1 {
            for d_lon in -1..=1 {
                keys.push(GeoKey {
                    lat_bucket: self.lat_bucket + d_lat,
                    lon_bucket: self.lon_bucket + d_lon,
                    category: self.category.clone(),
                });
            }
        }
        keys
    }

    pub fn as_tag(&self) -> String {
        format!("{}@{}:{}", self.category, self.lat_bucket, self.lon_bucket)
    }
}
