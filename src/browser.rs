use async_trait::async_trait;

use crate::errors::CrawlResult;
use crate::geo::GeoPoint;
use crate::model::RawRecord;

/// Browser-automation surface the orchestrator drives. Implementations
/// wrap a real automation backend; tests inject fakes.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self, url: &str) -> CrawlResult<Box<dyn BrowserSession>>;
}

/// One live page session. Scoped resource: whoever opens it closes it,
/// on every exit path.
#[async_trait]
pub trait BrowserSession: Send {
    /// Trigger loading of further results past the current viewport.
    async fn scroll(&mut self) -> CrawlResult<()>;

    /// Collect the raw records currently visible in the results panel.
    async fn extract_visible_records(&mut self) -> CrawlResult<Vec<RawRecord>>;

    async fn close(&mut self) -> CrawlResult<()>;
}

/// Listing URL for a category search centered on a point.
pub fn search_url(category: &str, center: GeoPoint, zoom: f64) -> String {
    format!(
        "https://www.google.com/maps/search/{category}/@{:.7},{:.7},{zoom}z",
        center.lat, center.lon
    )
}
