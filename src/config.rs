use std::{env, io};

use tracing::debug;

use crate::errors::{CrawlError, CrawlResult};

/// Kilometres spanned by one degree of latitude.
pub const KM_PER_DEGREE_LAT: f64 = 111.3188;

const DEFAULT_BUCKET_SIZE_DEG: f64 = 0.022;
const DEFAULT_MIN_SEARCH_RADIUS_KM: f64 = 2.5;
const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 45;
const DEFAULT_RESULTS_TIMEOUT_SECS: u64 = 20;
const DEFAULT_RESULTS_POLL_MS: u64 = 500;
const DEFAULT_SCROLL_SETTLE_MS: u64 = 3_000;
const DEFAULT_MAX_SCROLLS: u32 = 3;
const DEFAULT_MAP_ZOOM: f64 = 14.0;
const DEFAULT_IMAGE_POOL_SIZE: usize = 8;
const DEFAULT_IMAGE_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STORAGE_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_STORAGE_BACKOFF_MS: u64 = 250;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const DEFAULT_IMAGE_SEARCH_BASE: &str = "https://www.google.com/search";

/// Immutable configuration record handed to every component at
/// construction. Loaded once, never reconfigured at runtime.
#[derive(Clone, Debug)]
pub struct CrawlerConfig {
    /// Quantization cell size for the spatial cache grid, in degrees of
    /// latitude. Must stay at or below `min_search_radius_km` so two
    /// distinct search centers never collapse into one oversized bucket.
    pub bucket_size_deg: f64,
    /// Smallest radius a request is expected to carry.
    pub min_search_radius_km: f64,
    pub cache_ttl_secs: u64,
    pub navigation_timeout_secs: u64,
    pub results_timeout_secs: u64,
    pub results_poll_ms: u64,
    pub scroll_settle_ms: u64,
    pub max_scrolls: u32,
    pub map_zoom: f64,
    pub image_pool_size: usize,
    pub image_fetch_timeout_secs: u64,
    pub image_search_base: String,
    pub storage_retry_attempts: u32,
    pub storage_backoff_ms: u64,
    pub rating_weight: f64,
    pub distance_weight: f64,
    pub price_weight: f64,
    /// Distance beyond which the score's distance component saturates.
    pub max_useful_distance_km: f64,
    pub price_desirability_low: f64,
    pub price_desirability_mid: f64,
    pub price_desirability_high: f64,
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            bucket_size_deg: DEFAULT_BUCKET_SIZE_DEG,
            min_search_radius_km: DEFAULT_MIN_SEARCH_RADIUS_KM,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            navigation_timeout_secs: DEFAULT_NAVIGATION_TIMEOUT_SECS,
            results_timeout_secs: DEFAULT_RESULTS_TIMEOUT_SECS,
            results_poll_ms: DEFAULT_RESULTS_POLL_MS,
            scroll_settle_ms: DEFAULT_SCROLL_SETTLE_MS,
            max_scrolls: DEFAULT_MAX_SCROLLS,
            map_zoom: DEFAULT_MAP_ZOOM,
            image_pool_size: DEFAULT_IMAGE_POOL_SIZE,
            image_fetch_timeout_secs: DEFAULT_IMAGE_FETCH_TIMEOUT_SECS,
            image_search_base: DEFAULT_IMAGE_SEARCH_BASE.to_string(),
            storage_retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
            storage_backoff_ms: DEFAULT_STORAGE_BACKOFF_MS,
            rating_weight: 0.5,
            distance_weight: 0.3,
            price_weight: 0.2,
            max_useful_distance_km: 10.0,
            price_desirability_low: 1.0,
            price_desirability_mid: 0.6,
            price_desirability_high: 0.3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            bucket_size_deg: parse_f64("BUCKET_SIZE_DEG", DEFAULT_BUCKET_SIZE_DEG),
            min_search_radius_km: parse_f64("CACHE_MIN_RADIUS_KM", DEFAULT_MIN_SEARCH_RADIUS_KM),
            cache_ttl_secs: parse_u64("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            navigation_timeout_secs: parse_u64(
                "NAVIGATION_TIMEOUT_SECS",
                DEFAULT_NAVIGATION_TIMEOUT_SECS,
            ),
            results_timeout_secs: parse_u64("RESULTS_TIMEOUT_SECS", DEFAULT_RESULTS_TIMEOUT_SECS),
            results_poll_ms: parse_u64("RESULTS_POLL_MS", DEFAULT_RESULTS_POLL_MS),
            scroll_settle_ms: parse_u64("SCROLL_SETTLE_MS", DEFAULT_SCROLL_SETTLE_MS),
            max_scrolls: parse_u32("MAX_SCROLLS", DEFAULT_MAX_SCROLLS),
            map_zoom: parse_f64("MAP_ZOOM", DEFAULT_MAP_ZOOM),
            image_pool_size: parse_usize("IMAGE_POOL_SIZE", DEFAULT_IMAGE_POOL_SIZE).max(1),
            image_fetch_timeout_secs: parse_u64(
                "IMAGE_FETCH_TIMEOUT_SECS",
                DEFAULT_IMAGE_FETCH_TIMEOUT_SECS,
            ),
            image_search_base: env::var("IMAGE_SEARCH_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_SEARCH_BASE.to_string()),
            storage_retry_attempts: parse_u32(
                "STORAGE_RETRY_ATTEMPTS",
                DEFAULT_STORAGE_RETRY_ATTEMPTS,
            )
            .max(1),
            storage_backoff_ms: parse_u64("STORAGE_BACKOFF_MS", DEFAULT_STORAGE_BACKOFF_MS),
            rating_weight: parse_f64("RATING_WEIGHT", 0.5),
            distance_weight: parse_f64("DISTANCE_WEIGHT", 0.3),
            price_weight: parse_f64("PRICE_WEIGHT", 0.2),
            max_useful_distance_km: parse_f64("MAX_USEFUL_DISTANCE_KM", 10.0),
            price_desirability_low: parse_f64("PRICE_DESIRABILITY_LOW", 1.0),
            price_desirability_mid: parse_f64("PRICE_DESIRABILITY_MID", 0.6),
            price_desirability_high: parse_f64("PRICE_DESIRABILITY_HIGH", 0.3),
            user_agent: env::var("SCRAPER_USER_AGENT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        }
    }

    pub fn validate(&self) -> CrawlResult<()> {
        if self.bucket_size_deg <= 0.0 {
            return Err(CrawlError::Config(
                "bucket size must be a positive number of degrees".into(),
            ));
        }
        let bucket_km = self.bucket_size_deg * KM_PER_DEGREE_LAT;
        if bucket_km > self.min_search_radius_km {
            return Err(CrawlError::Config(format!(
                "bucket size spans {bucket_km:.2} km, larger than the minimum search radius \
                 of {:.2} km",
                self.min_search_radius_km
            )));
        }
        for (name, weight) in [
            ("RATING_WEIGHT", self.rating_weight),
            ("DISTANCE_WEIGHT", self.distance_weight),
            ("PRICE_WEIGHT", self.price_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(CrawlError::Config(format!(
                    "{name} must lie in [0, 1], got {weight}"
                )));
            }
        }
        let weight_sum = self.rating_weight + self.distance_weight + self.price_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(CrawlError::Config(format!(
                "scoring weights must sum to 1.0, got {weight_sum}"
            )));
        }
        if self.max_useful_distance_km <= 0.0 {
            return Err(CrawlError::Config(
                "MAX_USEFUL_DISTANCE_KM must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = CrawlerConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        env::set_var("MAX_SCROLLS", "7");
        env::set_var("CACHE_TTL_SECS", "120");
        env::set_var("IMAGE_POOL_SIZE", "0");

        let config = CrawlerConfig::from_env();

        assert_eq!(config.max_scrolls, 7);
        assert_eq!(config.cache_ttl_secs, 120);
        // pool size is clamped to at least one worker
        assert_eq!(config.image_pool_size, 1);

        env::remove_var("MAX_SCROLLS");
        env::remove_var("CACHE_TTL_SECS");
        env::remove_var("IMAGE_POOL_SIZE");
    }

    #[test]
    fn rejects_unbalanced_weights() {
        let config = CrawlerConfig {
            rating_weight: 0.9,
            distance_weight: 0.9,
            price_weight: 0.2,
            ..CrawlerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bucket_wider_than_minimum_radius() {
        let config = CrawlerConfig {
            bucket_size_deg: 0.1,
            ..CrawlerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
