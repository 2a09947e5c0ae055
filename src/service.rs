use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{info, warn};

use crate::browser::Browser;
use crate::cache::CacheStore;
use crate::config::CrawlerConfig;
use crate::errors::{CrawlError, CrawlResult, ScrapeReason};
use crate::images::{ImageEnricher, ImageSource};
use crate::model::{CacheEntry, Place, SearchRequest};
use crate::normalize::normalize_batch;
use crate::scoring::Scorer;
use crate::scraper::{ScrapeError, ScrapeOrchestrator};
use crate::storage::BlobStore;

/// Coarse milestones reported to an optional observer while a search
/// runs, for progress display in the consuming layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProgress {
    CacheLookup,
    Scraping,
    Normalizing,
    Storing,
    EnrichingImages,
    Finished,
}

pub type ProgressObserver = Arc<dyn Fn(SearchProgress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SearchOptions {
    /// Skip the cache lookup and scrape fresh; the result is still stored.
    pub force_refresh: bool,
    pub cancel: Option<Arc<AtomicBool>>,
    pub observer: Option<ProgressObserver>,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub places: Vec<Place>,
    pub from_cache: bool,
    /// Results were computed but could not be cached. They are still
    /// complete and correct; only the next identical search pays again.
    pub cache_write_failed: bool,
}

/// Top-level coordinator: cache first, scrape on a miss (one retry),
/// normalize, persist, enrich with images.
pub struct SearchService {
    config: CrawlerConfig,
    cache: CacheStore,
    orchestrator: ScrapeOrchestrator,
    enricher: ImageEnricher,
    scorer: Scorer,
}

impl SearchService {
    pub async fn open(
        config: CrawlerConfig,
        browser: Arc<dyn Browser>,
        store: Arc<dyn BlobStore>,
        images: Arc<dyn ImageSource>,
    ) -> CrawlResult<Self> {
        config.validate()?;
        let cache = CacheStore::open(store, &config).await;
        let orchestrator = ScrapeOrchestrator::new(browser, &config);
        let enricher = ImageEnricher::new(images, &config);
        let scorer = Scorer::new(&config);
        Ok(Self {
            config,
            cache,
            orchestrator,
            enricher,
            scorer,
        })
    }

    pub async fn search(&self, request: &SearchRequest) -> CrawlResult<SearchOutcome> {
        self.search_with_options(request, SearchOptions::default())
            .await
    }

    pub async fn search_with_options(
        &self,
        request: &SearchRequest,
        options: SearchOptions,
    ) -> CrawlResult<SearchOutcome> {
        let SearchOptions {
            force_refresh,
            cancel,
            observer,
        } = options;
        let cancel = cancel.unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        let report = |stage: SearchProgress| {
            if let Some(callback) = &observer {
                callback(stage);
            }
        };

        if !force_refresh {
            report(SearchProgress::CacheLookup);
            if let Some(entry) = self.cache.lookup(request).await {
                info!(bucket = %entry.bucket, places = entry.places.len(), "serving from cache");
                let mut places = entry.places;
                if places.iter().any(|place| place.image_ref.is_none()) {
                    report(SearchProgress::EnrichingImages);
                    places = self.enricher.enrich_all(places).await;
                }
                places.truncate(request.max_results);
                report(SearchProgress::Finished);
                return Ok(SearchOutcome {
                    places,
                    from_cache: true,
                    cache_write_failed: false,
                });
            }
        }

        report(SearchProgress::Scraping);
        let raws = match self.orchestrator.run(request, &cancel).await {
            Ok(raws) => raws,
            Err(first) if first.reason == ScrapeReason::Cancelled => {
                return Err(CrawlError::Cancelled)
            }
            Err(first) => {
                warn!(reason = first.reason.as_str(), "scrape failed, retrying once");
                match self.orchestrator.run(request, &cancel).await {
                    Ok(raws) => raws,
                    Err(second) if second.reason == ScrapeReason::Cancelled => {
                        return Err(CrawlError::Cancelled)
                    }
                    Err(second) => return Err(self.scrape_failure(request, first, second)),
                }
            }
        };

        report(SearchProgress::Normalizing);
        let mut places = normalize_batch(&raws, request.center, &self.scorer);
        rank(&mut places);

        report(SearchProgress::Storing);
        let key = request.geo_key(self.config.bucket_size_deg);
        let entry = CacheEntry::create(&key, request, places.clone(), self.config.cache_ttl_secs);
        let cache_write_failed = match self.cache.store(&entry).await {
            Ok(()) => false,
            Err(err) => {
                warn!(%err, "caching failed; serving results uncached");
                true
            }
        };

        places.truncate(request.max_results);
        report(SearchProgress::EnrichingImages);
        let places = self.enricher.enrich_all(places).await;
        report(SearchProgress::Finished);

        Ok(SearchOutcome {
            places,
            from_cache: false,
            cache_write_failed,
        })
    }

    /// Both orchestration attempts failed. Keep the attempt that saw
    /// more of the panel and hand its records back, normalized, inside
    /// the error.
    fn scrape_failure(
        &self,
        request: &SearchRequest,
        first: ScrapeError,
        second: ScrapeError,
    ) -> CrawlError {
        let reason = second.reason;
        let raws = if first.partial.len() >= second.partial.len() {
            first.partial
        } else {
            second.partial
        };
        let mut partial = normalize_batch(&raws, request.center, &self.scorer);
        rank(&mut partial);
        CrawlError::Scrape { reason, partial }
    }
}

/// Composite score descending, ties broken by id so repeated runs over
/// the same data order identically.
fn rank(places: &mut [Place]) {
    places.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
