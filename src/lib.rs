pub mod browser;
pub mod cache;
pub mod config;
pub mod errors;
pub mod geo;
pub mod images;
pub mod model;
pub mod normalize;
pub mod scoring;
pub mod scraper;
pub mod service;
pub mod storage;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use browser::{search_url, Browser, BrowserSession};
pub use cache::{CacheStore, MASTER_INDEX_KEY};
pub use config::CrawlerConfig;
pub use errors::{CrawlError, CrawlResult, ScrapeReason};
pub use geo::{canonical_category, haversine_km, GeoKey, GeoPoint};
pub use images::{HttpImageSource, ImageEnricher, ImageSource};
pub use model::{
    CacheEntry, ImageRef, MasterIndex, Place, PriceLevel, RawRecord, SearchRequest,
};
pub use normalize::{normalize, normalize_batch};
pub use scoring::Scorer;
pub use scraper::{ScrapeOrchestrator, ScrapePhase};
pub use service::{
    ProgressObserver, SearchOptions, SearchOutcome, SearchProgress, SearchService,
};
pub use storage::{BlobStore, FsBlobStore, MemoryBlobStore};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,map_crawler=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
