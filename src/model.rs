use std::collections::BTreeMap;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CrawlError, CrawlResult};
use crate::geo::{canonical_category, GeoKey, GeoPoint};

/// One user search, immutable once issued. Build through [`SearchRequest::new`],
/// which validates ranges and canonicalizes the category label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub center: GeoPoint,
    pub category: String,
    pub radius_km: f64,
    pub max_results: usize,
}

impl SearchRequest {
    pub fn new(
        center: GeoPoint,
        category: &str,
        radius_km: f64,
        max_results: usize,
    ) -> CrawlResult<Self> {
        if !center.in_bounds() {
            return Err(CrawlError::Config(format!(
                "search center ({}, {}) is outside valid coordinate ranges",
                center.lat, center.lon
            )));
        }
        let category = canonical_category(category);
        if category.is_empty() {
            return Err(CrawlError::Config("search category is empty".into()));
        }
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(CrawlError::Config(format!(
                "search radius must be positive, got {radius_km}"
            )));
        }
        if max_results == 0 {
            return Err(CrawlError::Config("max_results must be at least 1".into()));
        }
        Ok(Self {
            center,
            category,
            radius_km,
            max_results,
        })
    }

    pub fn geo_key(&self, bucket_deg: f64) -> GeoKey {
        GeoKey::compute(self.center, &self.category, bucket_deg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceLevel {
    Unknown,
    Low,
    Mid,
    High,
}

impl PriceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceLevel::Unknown => "unknown",
            PriceLevel::Low => "low",
            PriceLevel::Mid => "mid",
            PriceLevel::High => "high",
        }
    }
}

/// Reference to a fetched image. Only the reference is persisted; the
/// bytes themselves stay with the image source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub content_length: u64,
}

/// A validated, scored place. Immutable after scoring except
/// `image_ref`, which transitions once from empty to populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub rating: Option<f64>,
    pub review_count: u64,
    pub price_level: PriceLevel,
    pub coordinates: GeoPoint,
    pub distance_km: f64,
    pub image_ref: Option<ImageRef>,
    pub composite_score: f64,
}

/// Stable identity for a place: name plus coordinates quantized to
/// roughly ten metres, so repeated scrapes of the same venue converge
/// on one id even when the decoded position jitters slightly.
pub fn place_id(name: &str, coordinates: GeoPoint) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(format!("{:.4}:{:.4}", coordinates.lat, coordinates.lon).as_bytes());
    STANDARD_NO_PAD.encode(hasher.finalize())
}

/// Unvalidated scraped data for one place, prior to normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: Option<String>,
    pub rating_text: Option<String>,
    pub price_text: Option<String>,
    /// Result link; coordinates ride along in the `!3d<lat>!4d<lon>` form.
    pub url: Option<String>,
}

/// One persisted, immutable scrape result set for a grid bucket. A
/// refreshed search creates a new entry; entries are never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub bucket: String,
    pub category: String,
    pub center: GeoPoint,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub request_radius_km: f64,
    pub places: Vec<Place>,
}

impl CacheEntry {
    pub fn create(
        key: &GeoKey,
        request: &SearchRequest,
        places: Vec<Place>,
        ttl_secs: u64,
    ) -> Self {
        let created_at = Utc::now();
        let bucket = key.as_tag();
        let mut hasher = Sha256::new();
        hasher.update(bucket.as_bytes());
        hasher.update(created_at.timestamp_micros().to_le_bytes());
        hasher.update(rand::random::<u64>().to_le_bytes());
        hasher.update(format!("{:.6}:{:.6}", request.center.lat, request.center.lon).as_bytes());
        let id = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            id,
            bucket,
            category: key.category.clone(),
            center: request.center,
            created_at,
            ttl_secs,
            request_radius_km: request.radius_km,
            places,
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.created_at + Duration::seconds(self.ttl_secs as i64)
    }

    pub fn blob_key(&self) -> String {
        entry_blob_key(&self.id)
    }
}

pub fn entry_blob_key(entry_id: &str) -> String {
    format!("results/{entry_id}.json")
}

/// Index line pointing at one stored [`CacheEntry`]. Carries enough of
/// the entry's identity (center, category, age) for lookup to qualify
/// candidates without loading every blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub entry_id: String,
    pub category: String,
    pub center: GeoPoint,
    pub created_at: DateTime<Utc>,
}

/// Append-only directory mapping bucket tags to known entries. Only the
/// cache store mutates it: append in memory, then persist whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterIndex {
    pub records: BTreeMap<String, Vec<IndexRecord>>,
}

impl MasterIndex {
    pub fn append(&mut self, bucket: String, record: IndexRecord) {
        self.records.entry(bucket).or_default().push(record);
    }

    pub fn candidates<'a>(&'a self, neighborhood: &[GeoKey]) -> Vec<&'a IndexRecord> {
        let mut found = Vec::new();
        for key in neighborhood {
            if let Some(records) = self.records.get(&key.as_tag()) {
                found.extend(records.iter());
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_place(name: &str, score: f64) -> Place {
        let coordinates = GeoPoint::new(38.7204, -9.1402);
        Place {
            id: place_id(name, coordinates),
            name: name.to_string(),
            rating: Some(4.5),
            review_count: 1203,
            price_level: PriceLevel::Mid,
            coordinates,
            distance_km: 0.4,
            image_ref: None,
            composite_score: score,
        }
    }

    #[test]
    fn place_id_is_stable_and_discriminating() {
        let at = GeoPoint::new(38.72041, -9.14018);
        let nearby = GeoPoint::new(38.72043, -9.14022);
        assert_eq!(place_id("Taberna Moderna", at), place_id("Taberna Moderna", nearby));
        assert_ne!(place_id("Taberna Moderna", at), place_id("Cervejaria Ramiro", at));
    }

    #[test]
    fn request_constructor_rejects_bad_input() {
        let center = GeoPoint::new(38.72, -9.14);
        assert!(SearchRequest::new(GeoPoint::new(91.0, 0.0), "cafes", 2.0, 20).is_err());
        assert!(SearchRequest::new(center, "   ", 2.0, 20).is_err());
        assert!(SearchRequest::new(center, "cafes", 0.0, 20).is_err());
        assert!(SearchRequest::new(center, "cafes", 2.0, 0).is_err());

        let request = SearchRequest::new(center, " Fine  Dining ", 2.0, 20).unwrap();
        assert_eq!(request.category, "fine+dining");
    }

    #[test]
    fn cache_entry_round_trips_through_json() {
        let request = SearchRequest::new(GeoPoint::new(38.72, -9.14), "restaurants", 2.0, 20)
            .unwrap();
        let key = request.geo_key(0.022);
        let entry = CacheEntry::create(
            &key,
            &request,
            vec![sample_place("Alpha", 0.9), sample_place("Bravo", 0.7)],
            3600,
        );

        let encoded = serde_json::to_vec(&entry).unwrap();
        let decoded: CacheEntry = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.places[0].name, "Alpha");
    }

    #[test]
    fn entries_expire_by_ttl() {
        let request =
            SearchRequest::new(GeoPoint::new(38.72, -9.14), "restaurants", 2.0, 20).unwrap();
        let key = request.geo_key(0.022);
        let entry = CacheEntry::create(&key, &request, Vec::new(), 60);

        assert!(entry.is_fresh_at(entry.created_at + Duration::seconds(59)));
        assert!(!entry.is_fresh_at(entry.created_at + Duration::seconds(61)));
    }

    #[test]
    fn master_index_gathers_neighborhood_candidates() {
        let request =
            SearchRequest::new(GeoPoint::new(38.72, -9.14), "restaurants", 2.0, 20).unwrap();
        let key = request.geo_key(0.022);

        let mut index = MasterIndex::default();
        index.append(
            key.as_tag(),
            IndexRecord {
                entry_id: "entry-1".into(),
                category: key.category.clone(),
                center: request.center,
                created_at: Utc::now(),
            },
        );
        // a record one bucket north still belongs to the neighborhood
        let north = GeoKey {
            lat_bucket: key.lat_bucket + 1,
            lon_bucket: key.lon_bucket,
            category: key.category.clone(),
        };
        index.append(
            north.as_tag(),
            IndexRecord {
                entry_id: "entry-2".into(),
                category: key.category.clone(),
                center: GeoPoint::new(38.74, -9.14),
                created_at: Utc::now(),
            },
        );

        let candidates = index.candidates(&key.neighborhood());
        assert_eq!(candidates.len(), 2);
        assert_eq!(index.len(), 2);
    }
}
