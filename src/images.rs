use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::CrawlerConfig;
use crate::errors::{CrawlError, CrawlResult};
use crate::model::{ImageRef, Place};

/// Where place images come from. Implementations resolve one place to
/// one fetched image; tests inject fakes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, place: &Place) -> CrawlResult<ImageRef>;
}

/// Attaches images to places through a bounded worker pool. Pool size
/// is fixed by configuration and never scales with the input.
pub struct ImageEnricher {
    source: Arc<dyn ImageSource>,
    pool_size: usize,
    fetch_timeout: Duration,
}

impl ImageEnricher {
    pub fn new(source: Arc<dyn ImageSource>, config: &CrawlerConfig) -> Self {
        Self {
            source,
            pool_size: config.image_pool_size.max(1),
            fetch_timeout: Duration::from_secs(config.image_fetch_timeout_secs),
        }
    }

    /// Attempt one fetch per place, at most `pool_size` in flight.
    /// Failures and timeouts leave that place's `image_ref` empty and
    /// never disturb the rest of the batch. Input order is preserved.
    pub async fn enrich_all(&self, places: Vec<Place>) -> Vec<Place> {
        stream::iter(places)
            .map(|place| self.enrich_one(place))
            .buffered(self.pool_size)
            .collect()
            .await
    }

    async fn enrich_one(&self, mut place: Place) -> Place {
        if place.image_ref.is_some() {
            return place;
        }
        match timeout(self.fetch_timeout, self.source.fetch_image(&place)).await {
            Ok(Ok(image)) => {
                debug!(place = %place.name, url = %image.url, "image attached");
                place.image_ref = Some(image);
            }
            Ok(Err(err)) => warn!(%err, place = %place.name, "image fetch failed"),
            Err(_) => warn!(place = %place.name, "image fetch timed out"),
        }
        place
    }
}

/// Image source scraping an image-search results page for direct
/// `.jpg` links, then downloading the first candidate.
pub struct HttpImageSource {
    http: reqwest::Client,
    search_base: String,
}

impl HttpImageSource {
    pub fn new(config: &CrawlerConfig) -> CrawlResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.image_fetch_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            search_base: config.image_search_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch_image(&self, place: &Place) -> CrawlResult<ImageRef> {
        let query = format!("google+maps+{}", place.name.replace(' ', "+"));
        let search = format!("{}?q={query}&tbm=isch", self.search_base);
        let body = self
            .http
            .get(&search)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let url = extract_image_links(&body, 1).pop().ok_or_else(|| {
            CrawlError::ImageFetch(format!("no image links found for '{}'", place.name))
        })?;

        let bytes = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(ImageRef {
            url,
            content_length: bytes.len() as u64,
        })
    }
}

/// Scan a page body for plain `http…jpg` / `http…jpeg` links.
fn extract_image_links(body: &str, limit: usize) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("http") {
        let tail = &rest[start..];
        let end = tail
            .find(['"', '\'', '\\', ',', ' ', '\n', '<', '>'])
            .unwrap_or(tail.len());
        let candidate = &tail[..end];
        if candidate.ends_with(".jpg") || candidate.ends_with(".jpeg") {
            links.push(candidate.to_string());
            if links.len() == limit {
                break;
            }
        }
        rest = &rest[start + 4..];
    }
    links
}
