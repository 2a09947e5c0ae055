use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::browser::{search_url, Browser, BrowserSession};
use crate::config::CrawlerConfig;
use crate::errors::ScrapeReason;
use crate::model::{RawRecord, SearchRequest};

/// States of one orchestration run. `Failed` is implicit in the error
/// path; every other transition is traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapePhase {
    Idle,
    Navigating,
    Searching,
    Scrolling,
    Extracting,
    Done,
}

impl ScrapePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapePhase::Idle => "idle",
            ScrapePhase::Navigating => "navigating",
            ScrapePhase::Searching => "searching",
            ScrapePhase::Scrolling => "scrolling",
            ScrapePhase::Extracting => "extracting",
            ScrapePhase::Done => "done",
        }
    }
}

/// One failed orchestration, keeping whatever records were already
/// visible before the failure.
#[derive(Debug)]
pub struct ScrapeError {
    pub reason: ScrapeReason,
    pub partial: Vec<RawRecord>,
}

/// Drives a browser session through navigate → search → scroll →
/// extract. One run per search request; the session is closed on every
/// exit path. Retrying a failed run is the caller's call.
pub struct ScrapeOrchestrator {
    browser: Arc<dyn Browser>,
    navigation_timeout: Duration,
    results_timeout: Duration,
    results_poll: Duration,
    scroll_settle: Duration,
    max_scrolls: u32,
    zoom: f64,
}

impl ScrapeOrchestrator {
    pub fn new(browser: Arc<dyn Browser>, config: &CrawlerConfig) -> Self {
        Self {
            browser,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            results_timeout: Duration::from_secs(config.results_timeout_secs),
            results_poll: Duration::from_millis(config.results_poll_ms),
            scroll_settle: Duration::from_millis(config.scroll_settle_ms),
            max_scrolls: config.max_scrolls,
            zoom: config.map_zoom,
        }
    }

    pub async fn run(
        &self,
        request: &SearchRequest,
        cancel: &AtomicBool,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        let mut phase = ScrapePhase::Idle;
        self.transition(&mut phase, ScrapePhase::Navigating);

        if cancel.load(Ordering::SeqCst) {
            return Err(self.fail(ScrapeReason::Cancelled, Vec::new()));
        }

        let url = search_url(&request.category, request.center, self.zoom);
        let mut session = match timeout(self.navigation_timeout, self.browser.open(&url)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!(%err, %url, "failed to open listing");
                return Err(self.fail(ScrapeReason::Navigation, Vec::new()));
            }
            Err(_) => {
                warn!(%url, "navigation timed out");
                return Err(self.fail(ScrapeReason::Timeout, Vec::new()));
            }
        };

        let outcome = self
            .run_session(session.as_mut(), cancel, &mut phase)
            .await;
        if let Err(err) = session.close().await {
            warn!(%err, "failed to close browser session");
        }
        outcome
    }

    async fn run_session(
        &self,
        session: &mut dyn BrowserSession,
        cancel: &AtomicBool,
        phase: &mut ScrapePhase,
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        self.transition(phase, ScrapePhase::Searching);
        let deadline = Instant::now() + self.results_timeout;
        let mut records;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(self.fail(ScrapeReason::Cancelled, Vec::new()));
            }
            records = self.extract(session, &[]).await?;
            if !records.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                // An empty panel at the deadline is a legitimate result:
                // the region simply has no matches.
                self.transition(phase, ScrapePhase::Done);
                info!("results panel stayed empty, finishing with zero records");
                return Ok(Vec::new());
            }
            sleep(self.results_poll).await;
        }

        let mut scrolls = 0;
        while scrolls < self.max_scrolls {
            if cancel.load(Ordering::SeqCst) {
                return Err(self.fail(ScrapeReason::Cancelled, records));
            }

            self.transition(phase, ScrapePhase::Scrolling);
            match timeout(self.results_timeout, session.scroll()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(%err, scrolls, "scroll failed");
                    return Err(self.fail(ScrapeReason::Extraction, records));
                }
                Err(_) => return Err(self.fail(ScrapeReason::Timeout, records)),
            }
            sleep(self.scroll_settle).await;
            scrolls += 1;

            if cancel.load(Ordering::SeqCst) {
                return Err(self.fail(ScrapeReason::Cancelled, records));
            }
            self.transition(phase, ScrapePhase::Extracting);
            let visible = self.extract(session, &records).await?;
            let grew = visible.len() > records.len();
            if visible.len() >= records.len() {
                records = visible;
            }
            if !grew {
                debug!(scrolls, "no new content after scroll, stopping");
                break;
            }
        }

        self.transition(phase, ScrapePhase::Done);
        info!(count = records.len(), scrolls, "scrape finished");
        Ok(records)
    }

    async fn extract(
        &self,
        session: &mut dyn BrowserSession,
        collected: &[RawRecord],
    ) -> Result<Vec<RawRecord>, ScrapeError> {
        match timeout(self.results_timeout, session.extract_visible_records()).await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(err)) => {
                warn!(%err, "record extraction failed");
                Err(self.fail(ScrapeReason::Extraction, collected.to_vec()))
            }
            Err(_) => Err(self.fail(ScrapeReason::Timeout, collected.to_vec())),
        }
    }

    fn transition(&self, phase: &mut ScrapePhase, next: ScrapePhase) {
        debug!(from = phase.as_str(), to = next.as_str(), "scrape transition");
        *phase = next;
    }

    fn fail(&self, reason: ScrapeReason, partial: Vec<RawRecord>) -> ScrapeError {
        warn!(reason = reason.as_str(), kept = partial.len(), "scrape failed");
        ScrapeError { reason, partial }
    }
}
