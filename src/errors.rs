use std::fmt;
use std::io;

use thiserror::Error;

use crate::model::Place;

pub type CrawlResult<T> = Result<T, CrawlError>;

/// Why a scrape orchestration gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeReason {
    Timeout,
    Navigation,
    Extraction,
    Cancelled,
}

impl ScrapeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeReason::Timeout => "timeout",
            ScrapeReason::Navigation => "navigation",
            ScrapeReason::Extraction => "extraction",
            ScrapeReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScrapeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("failed to parse scraped record: {0}")]
    Parse(String),
    #[error("scrape failed ({reason}), {} partial results recovered", .partial.len())]
    Scrape {
        reason: ScrapeReason,
        partial: Vec<Place>,
    },
    #[error("cache storage failed: {0}")]
    Storage(String),
    #[error("image fetch failed: {0}")]
    ImageFetch(String),
    #[error("search cancelled by caller")]
    Cancelled,
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
