use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::CrawlerConfig;
use crate::errors::{CrawlError, CrawlResult};
use crate::geo::haversine_km;
use crate::model::{entry_blob_key, CacheEntry, IndexRecord, MasterIndex, SearchRequest};
use crate::storage::BlobStore;

pub const MASTER_INDEX_KEY: &str = "master_index.json";

/// Durable GeoKey → CacheEntry mapping over a [`BlobStore`], with
/// neighbor-bucket proximity lookup. The master index is held in
/// memory and re-persisted after every append; writers are serialized
/// through one async guard.
pub struct CacheStore {
    store: Arc<dyn BlobStore>,
    index: AsyncMutex<MasterIndex>,
    bucket_size_deg: f64,
    ttl_secs: u64,
    retry_attempts: u32,
    backoff_base: Duration,
}

impl CacheStore {
    pub async fn open(store: Arc<dyn BlobStore>, config: &CrawlerConfig) -> Self {
        let index = match load_index(store.as_ref()).await {
            Ok(index) => index,
            Err(err) => {
                warn!(%err, "master index unreadable, starting from an empty one");
                MasterIndex::default()
            }
        };
        info!(known_entries = index.len(), "cache store opened");

        Self {
            store,
            index: AsyncMutex::new(index),
            bucket_size_deg: config.bucket_size_deg,
            ttl_secs: config.cache_ttl_secs,
            retry_attempts: config.storage_retry_attempts.max(1),
            backoff_base: Duration::from_millis(config.storage_backoff_ms),
        }
    }

    /// Freshest stored entry matching the request, or `None`. A miss is
    /// not an error, and neither is an unreadable candidate blob: those
    /// are logged and skipped, the caller just scrapes again.
    pub async fn lookup(&self, request: &SearchRequest) -> Option<CacheEntry> {
        let key = request.geo_key(self.bucket_size_deg);
        let now = Utc::now();
        let horizon = chrono::Duration::seconds(self.ttl_secs as i64);

        let mut candidates: Vec<IndexRecord> = {
            let index = self.index.lock().await;
            index
                .candidates(&key.neighborhood())
                .into_iter()
                .filter(|record| record.category == key.category)
                .filter(|record| now < record.created_at + horizon)
                .filter(|record| {
                    haversine_km(record.center, request.center) <= request.radius_km
                })
                .cloned()
                .collect()
        };
        candidates.sort_by_key(|record| std::cmp::Reverse(record.created_at));

        for record in candidates {
            match self.load_entry(&record.entry_id).await {
                Ok(Some(entry)) if entry.is_fresh_at(now) => {
                    debug!(entry_id = %record.entry_id, bucket = %entry.bucket, "cache hit");
                    return Some(entry);
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(entry_id = %record.entry_id, "index points at a missing entry blob")
                }
                Err(err) => {
                    warn!(%err, entry_id = %record.entry_id, "failed to load cached entry")
                }
            }
        }
        None
    }

    /// Persist an entry, then record it in the master index. The entry
    /// blob lands first: a failure in between leaves an orphaned blob
    /// rather than an index line pointing at nothing.
    pub async fn store(&self, entry: &CacheEntry) -> CrawlResult<()> {
        let payload = serde_json::to_vec(entry)?;
        self.put_with_retry(&entry.blob_key(), &payload).await?;

        let mut index = self.index.lock().await;
        index.append(
            entry.bucket.clone(),
            IndexRecord {
                entry_id: entry.id.clone(),
                category: entry.category.clone(),
                center: entry.center,
                created_at: entry.created_at,
            },
        );
        let encoded = serde_json::to_vec(&*index)?;
        self.put_with_retry(MASTER_INDEX_KEY, &encoded).await?;

        debug!(
            entry_id = %entry.id,
            bucket = %entry.bucket,
            places = entry.places.len(),
            "cache entry stored"
        );
        Ok(())
    }

    async fn load_entry(&self, entry_id: &str) -> CrawlResult<Option<CacheEntry>> {
        match self.store.get(&entry_blob_key(entry_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_with_retry(&self, key: &str, bytes: &[u8]) -> CrawlResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.put(key, bytes).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(%err, attempt, key, "blob write failed; retrying after {:?}", delay);
                    sleep(delay).await;
                }
                Err(err) => {
                    return Err(CrawlError::Storage(format!(
                        "giving up on '{key}' after {attempt} attempts: {err}"
                    )));
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt - 1).min(6);
        let base = self.backoff_base * (1_u32 << exponent);
        let jitter_ms = {
            let ceiling = (self.backoff_base.as_millis() as u64).max(1);
            rand::thread_rng().gen_range(0..ceiling)
        };
        base + Duration::from_millis(jitter_ms)
    }
}

async fn load_index(store: &dyn BlobStore) -> CrawlResult<MasterIndex> {
    match store.get(MASTER_INDEX_KEY).await? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => {
            debug!("no master index blob yet, starting fresh");
            Ok(MasterIndex::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::geo::GeoPoint;
    use crate::model::{place_id, Place, PriceLevel};
    use crate::storage::MemoryBlobStore;

    use super::*;

    fn test_config() -> CrawlerConfig {
        CrawlerConfig {
            storage_backoff_ms: 1,
            ..CrawlerConfig::default()
        }
    }

    fn request_at(lat: f64, lon: f64, category: &str) -> SearchRequest {
        SearchRequest::new(GeoPoint::new(lat, lon), category, 2.0, 20).unwrap()
    }

    fn place(name: &str) -> Place {
        let coordinates = GeoPoint::new(38.7204, -9.1402);
        Place {
            id: place_id(name, coordinates),
            name: name.to_string(),
            rating: Some(4.2),
            review_count: 310,
            price_level: PriceLevel::Low,
            coordinates,
            distance_km: 0.3,
            image_ref: None,
            composite_score: 0.8,
        }
    }

    fn entry_for(request: &SearchRequest, places: Vec<Place>, ttl_secs: u64) -> CacheEntry {
        CacheEntry::create(&request.geo_key(0.022), request, places, ttl_secs)
    }

    #[tokio::test]
    async fn nearby_request_hits_after_store() {
        let cache = CacheStore::open(Arc::new(MemoryBlobStore::new()), &test_config()).await;
        let first = request_at(38.7223, -9.1393, "Restaurants");
        cache
            .store(&entry_for(&first, vec![place("Ramiro")], 3600))
            .await
            .unwrap();

        // ~700 m away, same category: must match
        let second = request_at(38.7280, -9.1360, "restaurants");
        let hit = cache.lookup(&second).await.expect("cache hit");
        assert_eq!(hit.places.len(), 1);
        assert_eq!(hit.places[0].name, "Ramiro");
    }

    #[tokio::test]
    async fn category_must_match_exactly() {
        let cache = CacheStore::open(Arc::new(MemoryBlobStore::new()), &test_config()).await;
        let first = request_at(38.7223, -9.1393, "restaurants");
        cache.store(&entry_for(&first, Vec::new(), 3600)).await.unwrap();

        let other = request_at(38.7223, -9.1393, "petrol pump");
        assert!(cache.lookup(&other).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_skipped() {
        let cache = CacheStore::open(Arc::new(MemoryBlobStore::new()), &test_config()).await;
        let request = request_at(38.7223, -9.1393, "restaurants");
        cache.store(&entry_for(&request, Vec::new(), 0)).await.unwrap();

        assert!(cache.lookup(&request).await.is_none());
    }

    #[tokio::test]
    async fn freshest_qualifying_entry_wins() {
        let cache = CacheStore::open(Arc::new(MemoryBlobStore::new()), &test_config()).await;
        let request = request_at(38.7223, -9.1393, "restaurants");

        let mut stale = entry_for(&request, vec![place("Old Guard")], 86_400);
        stale.created_at = Utc::now() - chrono::Duration::hours(2);
        cache.store(&stale).await.unwrap();
        cache
            .store(&entry_for(&request, vec![place("New Wave")], 86_400))
            .await
            .unwrap();

        let hit = cache.lookup(&request).await.expect("cache hit");
        assert_eq!(hit.places[0].name, "New Wave");
    }

    #[tokio::test]
    async fn index_survives_a_reopen() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let request = request_at(38.7223, -9.1393, "restaurants");
        {
            let cache = CacheStore::open(store.clone(), &test_config()).await;
            cache
                .store(&entry_for(&request, vec![place("Ramiro")], 3600))
                .await
                .unwrap();
        }

        let reopened = CacheStore::open(store, &test_config()).await;
        let hit = reopened.lookup(&request).await.expect("cache hit");
        assert_eq!(hit.places[0].name, "Ramiro");
    }

    #[tokio::test]
    async fn corrupt_entry_blob_degrades_to_a_miss() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = CacheStore::open(store.clone(), &test_config()).await;
        let request = request_at(38.7223, -9.1393, "restaurants");
        let entry = entry_for(&request, vec![place("Ramiro")], 3600);
        cache.store(&entry).await.unwrap();

        store.put(&entry.blob_key(), b"not json").await.unwrap();
        assert!(cache.lookup(&request).await.is_none());
    }

    struct RecordingStore {
        inner: MemoryBlobStore,
        puts: Mutex<Vec<String>>,
        failures_left: AtomicU32,
        attempts: AtomicU32,
    }

    impl RecordingStore {
        fn new(failures_left: u32) -> Self {
            Self {
                inner: MemoryBlobStore::new(),
                puts: Mutex::new(Vec::new()),
                failures_left: AtomicU32::new(failures_left),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BlobStore for RecordingStore {
        async fn get(&self, key: &str) -> CrawlResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, bytes: &[u8]) -> CrawlResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(CrawlError::Storage("backend unavailable".into()));
            }
            self.puts.lock().push(key.to_string());
            self.inner.put(key, bytes).await
        }

        async fn list(&self, prefix: &str) -> CrawlResult<Vec<String>> {
            self.inner.list(prefix).await
        }
    }

    #[tokio::test]
    async fn entry_blob_lands_before_the_index() {
        let store = Arc::new(RecordingStore::new(0));
        let cache = CacheStore::open(store.clone(), &test_config()).await;
        let request = request_at(38.7223, -9.1393, "restaurants");
        cache.store(&entry_for(&request, Vec::new(), 3600)).await.unwrap();

        let puts = store.puts.lock().clone();
        assert_eq!(puts.len(), 2);
        assert!(puts[0].starts_with("results/"));
        assert_eq!(puts[1], MASTER_INDEX_KEY);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let store = Arc::new(RecordingStore::new(1));
        let cache = CacheStore::open(store.clone(), &test_config()).await;
        let request = request_at(38.7223, -9.1393, "restaurants");

        cache.store(&entry_for(&request, Vec::new(), 3600)).await.unwrap();
        // one failed attempt, then entry + index writes
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_a_storage_error() {
        let store = Arc::new(RecordingStore::new(u32::MAX));
        let cache = CacheStore::open(store.clone(), &test_config()).await;
        let request = request_at(38.7223, -9.1393, "restaurants");

        let err = cache
            .store(&entry_for(&request, Vec::new(), 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Storage(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }
}
