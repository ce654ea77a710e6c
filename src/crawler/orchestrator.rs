//! The crawl state machine: dequeue, classify, fetch, challenge-check,
//! extract, requeue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::Page;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use super::browser::{eval_or_default, page_title, BrowserSession, FetchError, ResponseCapture};
use super::challenge::{
    looks_like_challenge, BackoffMultiplier, CLEARANCE_POLL, CLEARANCE_TIMEOUT, HEADLESS_COOLDOWN,
};
use super::extract;
use crate::config::{Config, ConfigError};
use crate::events::{CrawlStatus, EventBus, LogLevel};
use crate::profile::{PageClass, ProfileRegistry, SiteProfile};
use crate::resolve;
use crate::store::{NewAsset, Store, StoreError, VisitStatus};

/// Priority for seeded start URLs.
const SEED_PRIORITY: i64 = 100;

/// Priority for discovered item links - completion of known assets is
/// biased over discovery of more.
const ITEM_PRIORITY: i64 = 10;

/// Priority for discovered catalog links.
const CATALOG_PRIORITY: i64 = 5;

/// Priority for pages re-enqueued after an unsolved challenge.
const CHALLENGE_REQUEUE_PRIORITY: i64 = 10;

/// Poll interval for the cooperative pause checkpoint.
const PAUSE_POLL: Duration = Duration::from_millis(500);

/// Errors aborting a crawl run before or during setup.
///
/// Per-page failures never surface here; they are recorded as failed
/// visits and the run continues.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Configuration rejected before work began.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A profile name has no registration.
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// Store operation failed during setup or queue management.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Browser could not be launched.
    #[error(transparent)]
    Browser(#[from] FetchError),
}

/// Pause/resume/stop control surface handed to the UI.
///
/// Pause is a cooperative checkpoint polled between units of work; stop
/// cancels the loop and any outstanding waits.
#[derive(Debug, Clone, Default)]
pub struct CrawlHandle {
    paused: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl CrawlHandle {
    /// Requests a pause at the next checkpoint.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes from a pause.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Requests the run stop; outstanding waits are cancelled.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// True when a pause is requested.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// True when a stop is requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless a stop arrives first.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = self.stop_notify.notified() => {}
        }
    }
}

/// Outcome of fetching one page.
enum PageOutcome {
    /// Page processed; links queued.
    Processed {
        /// Links enqueued from this page.
        queued: u32,
    },
    /// A challenge blocked the page and was not cleared.
    Challenged,
}

/// The crawl orchestrator. One instance per run; all configuration is
/// explicit construction state.
pub struct Crawler {
    store: Store,
    events: EventBus,
    config: Config,
    profiles: Vec<SiteProfile>,
    handle: CrawlHandle,
}

impl Crawler {
    /// Builds a crawler, resolving profile names against the registry.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Config`] for invalid configuration and
    /// [`CrawlError::UnknownProfile`] for an unregistered profile name -
    /// the only errors reported before work begins.
    pub fn new(
        store: Store,
        events: EventBus,
        config: Config,
        registry: &ProfileRegistry,
    ) -> Result<Self, CrawlError> {
        config.validate()?;
        let mut profiles = Vec::with_capacity(config.profiles.len());
        for name in &config.profiles {
            let profile = registry
                .get(name)
                .ok_or_else(|| CrawlError::UnknownProfile(name.clone()))?;
            profiles.push(profile.clone());
        }
        if profiles.is_empty() {
            return Err(CrawlError::Config(ConfigError::NothingToDo));
        }
        Ok(Self {
            store,
            events,
            config,
            profiles,
            handle: CrawlHandle::default(),
        })
    }

    /// Returns the control handle for this run.
    #[must_use]
    pub fn handle(&self) -> CrawlHandle {
        self.handle.clone()
    }

    /// Seeds each active profile's queue with its start URL.
    ///
    /// Explicit start URLs from the config override profile defaults when
    /// a single profile is active. Seeds are always re-fetched, so any
    /// earlier visit record is dropped first.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Store`] on queue failure.
    #[instrument(skip(self))]
    pub async fn seed(&self) -> Result<(), CrawlError> {
        for profile in &self.profiles {
            let starts: Vec<String> = if self.profiles.len() == 1 && !self.config.start_urls.is_empty()
            {
                self.config.start_urls.clone()
            } else if profile.start_url.is_empty() {
                Vec::new()
            } else {
                vec![profile.start_url.clone()]
            };

            for start in starts {
                let Some(normalized) = profile.normalize_url(&start) else {
                    warn!(url = %start, profile = %profile.name, "seed URL rejected");
                    continue;
                };
                self.store.forget_visit(&normalized).await?;
                self.store
                    .enqueue(&normalized, 0, SEED_PRIORITY, &profile.name)
                    .await?;
                self.events.log(
                    LogLevel::Info,
                    format!("Seeded [{}]: {normalized}", profile.name),
                );
            }
        }
        Ok(())
    }

    /// Runs the crawl to completion: rotates profiles in fixed order,
    /// processing up to a batch per profile, until every queue is empty
    /// or a stop arrives.
    ///
    /// # Errors
    ///
    /// Returns setup-level errors only; per-page failures are isolated.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), CrawlError> {
        let session = BrowserSession::launch(self.config.headless).await?;
        self.events.status(CrawlStatus::Running);
        if let Ok(stats) = self.store.stats().await {
            self.events.stats(stats);
        }

        let mut backoff = BackoffMultiplier::default();
        let mut page_count: u64 = 0;
        let mut profile_idx: usize = 0;
        let batch_size = self.config.batch_size;

        'run: while !self.handle.is_stopping() {
            let mut empty_profiles = 0;

            for _ in 0..self.profiles.len() {
                if self.handle.is_stopping() {
                    break 'run;
                }
                let profile = &self.profiles[profile_idx % self.profiles.len()];
                profile_idx += 1;

                let queued = self.store.queue_size(Some(&profile.name)).await?;
                if queued == 0 {
                    empty_profiles += 1;
                    continue;
                }
                self.events.log(
                    LogLevel::Info,
                    format!("[{}] starting batch ({queued} queued)", profile.name),
                );

                let mut batch_count = 0;
                while batch_count < batch_size && !self.handle.is_stopping() {
                    self.pause_checkpoint().await;
                    if self.handle.is_stopping() {
                        break 'run;
                    }

                    let Some(item) = self.store.dequeue(Some(&profile.name)).await? else {
                        break;
                    };

                    if self.config.max_pages > 0 && page_count >= self.config.max_pages {
                        self.events
                            .log(LogLevel::Warn, format!("Max pages ({}) reached", self.config.max_pages));
                        break 'run;
                    }

                    if !self.eligible(profile, &item.url).await? {
                        continue;
                    }

                    let class = profile.classify(&item.url);
                    debug!(url = %item.url, ?class, depth = item.depth, "processing page");

                    let outcome = match class {
                        PageClass::Item => {
                            self.fetch_item(&session, profile, &item.url, item.depth).await
                        }
                        PageClass::Catalog | PageClass::Generic => {
                            self.fetch_catalog(&session, profile, &item.url, item.depth).await
                        }
                    };

                    match outcome {
                        Ok(PageOutcome::Processed { queued }) => {
                            self.store
                                .mark_visited(&item.url, item.depth, &profile.name, VisitStatus::Done)
                                .await?;
                            backoff.relax();
                            debug!(url = %item.url, queued, "page done");
                        }
                        Ok(PageOutcome::Challenged) => {
                            // Unsolved challenge: back off and retry the page later
                            self.store
                                .enqueue(&item.url, item.depth, CHALLENGE_REQUEUE_PRIORITY, &profile.name)
                                .await?;
                            backoff.escalate();
                            self.events.log(
                                LogLevel::Warn,
                                format!("Backoff multiplier: {:.1}x", backoff.value()),
                            );
                            self.events.status(CrawlStatus::Running);
                        }
                        Err(error) => {
                            // Transient fetch failure: failed visit, no in-run retry
                            warn!(url = %item.url, %error, "page fetch failed");
                            self.events
                                .log(LogLevel::Error, format!("FAIL {}: {error}", item.url));
                            self.store
                                .mark_visited(&item.url, item.depth, &profile.name, VisitStatus::Failed)
                                .await?;
                        }
                    }

                    page_count += 1;
                    batch_count += 1;
                    if let Ok(stats) = self.store.stats().await {
                        self.events.stats(stats);
                    }

                    // Humanized pacing scaled by the global challenge backoff
                    let jitter = rand::thread_rng().gen_range(0.6..1.5);
                    let base = Duration::from_millis(self.config.page_delay_ms).mul_f64(jitter);
                    self.handle.sleep(backoff.scale(base).max(PAUSE_POLL)).await;
                }

                if batch_count > 0 {
                    self.events.log(
                        LogLevel::Info,
                        format!("[{}] batch done: {batch_count} pages, rotating", profile.name),
                    );
                }
            }

            // Terminal: every profile's queue is empty
            if empty_profiles == self.profiles.len() && self.store.queue_size(None).await? == 0 {
                self.events.log(LogLevel::Info, "All queues empty - crawl complete");
                break;
            }
        }

        session.close().await;
        self.events.status(CrawlStatus::Idle);
        if let Ok(stats) = self.store.stats().await {
            self.events.stats(stats);
        }
        info!(page_count, "crawl finished");
        Ok(())
    }

    /// Domain/exclusion/resume guards applied after dequeue.
    async fn eligible(&self, profile: &SiteProfile, url: &str) -> Result<bool, CrawlError> {
        let host = crate::util::host_of(url).unwrap_or_default();
        if !profile.is_allowed_domain(&host) || profile.is_excluded(url) {
            self.store
                .mark_visited(url, 0, &profile.name, VisitStatus::Done)
                .await?;
            debug!(url, "skipped (domain/excluded)");
            return Ok(false);
        }
        if self.config.resume && self.store.is_visited(url).await? {
            debug!(url, "skipped (already done)");
            return Ok(false);
        }
        Ok(true)
    }

    /// Cooperative pause checkpoint between units of work.
    async fn pause_checkpoint(&self) {
        if !self.handle.is_paused() {
            return;
        }
        self.events.status(CrawlStatus::Paused);
        while self.handle.is_paused() && !self.handle.is_stopping() {
            self.handle.sleep(PAUSE_POLL).await;
        }
        if !self.handle.is_stopping() {
            self.events.status(CrawlStatus::Running);
        }
    }

    // ==================== Item pages ====================

    /// Fetches one item page in an isolated page (tab): scoped network
    /// capture, metadata extraction, player triggering, source scanning,
    /// related-link harvesting.
    async fn fetch_item(
        &self,
        session: &BrowserSession,
        profile: &SiteProfile,
        url: &str,
        depth: i64,
    ) -> Result<PageOutcome, FetchError> {
        let stream_re = profile.stream_url_regex();
        let page = session.open_page().await?;
        let capture = ResponseCapture::attach(&page, stream_re.clone()).await?;

        let result = self
            .fetch_item_inner(session, profile, &page, url, depth, &stream_re, capture)
            .await;
        let _ = page.close().await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_item_inner(
        &self,
        session: &BrowserSession,
        profile: &SiteProfile,
        page: &Page,
        url: &str,
        depth: i64,
        stream_re: &regex::Regex,
        capture: ResponseCapture,
    ) -> Result<PageOutcome, FetchError> {
        session
            .navigate(page, url, Duration::from_millis(self.config.timeout_ms))
            .await?;

        // Settle for client-side hydration
        self.handle.sleep(jittered(Duration::from_millis(1500), 2.0)).await;

        if !self.challenge_gate(page).await {
            capture.detach();
            return Ok(PageOutcome::Challenged);
        }

        // Metadata: extraction chain over rendered HTML + visible text
        let html = page.content().await.unwrap_or_default();
        let body_text: String = eval_or_default(page, extract::BODY_TEXT_JS).await;
        let title = page_title(page).await;
        let mut meta = extract::extract_metadata(profile, &html, &body_text, &title);
        meta.source_url = url.to_string();
        if meta.asset_id.is_empty()
            && let Some(id) = profile.asset_id_of(url)
        {
            meta.asset_id = id;
        }

        if !meta.asset_id.is_empty() {
            self.persist_metadata(&meta).await;
        }

        // Nudge lazy players into requesting their manifests, then wait
        let _: serde_json::Value = eval_or_default(page, extract::TRIGGER_PLAYERS_JS).await;
        self.handle
            .sleep(Duration::from_millis(self.config.settle_ms))
            .await;

        // Candidate streams from every capture route
        let html = page.content().await.unwrap_or_default();
        let mut candidates = extract::scan_html_for_streams(&html, stream_re);
        let dom_srcs: Vec<String> = eval_or_default(page, extract::VIDEO_SRC_JS).await;
        let intercepted: Vec<String> = eval_or_default(page, extract::COLLECT_INTERCEPTED_JS).await;
        for candidate in dom_srcs.into_iter().chain(intercepted) {
            if stream_re.is_match(&candidate) && !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        for candidate in capture.detach() {
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        self.record_candidates(profile, &meta, candidates).await;

        // Related/similar sections hide below the fold
        if profile.scroll_items {
            self.scroll_to_bottom(page).await;
        }

        let queued = self.harvest_links(page, profile, depth).await;
        Ok(PageOutcome::Processed { queued })
    }

    /// Persists extracted metadata: insert on first sight, then
    /// fill-if-empty merge.
    async fn persist_metadata(&self, meta: &NewAsset) {
        match self.store.upsert_asset(meta).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(error) = self.store.update_metadata(&meta.asset_id, meta).await {
                    warn!(asset_id = %meta.asset_id, %error, "metadata merge failed");
                }
            }
            Err(error) => warn!(asset_id = %meta.asset_id, %error, "asset upsert failed"),
        }
    }

    /// Attribution and recording of stream candidates.
    ///
    /// Candidates are grouped by the asset id embedded in their URLs and
    /// collapsed to the best quality per group. Capture is scoped to the
    /// asset being visited: ids that differ from the current asset are
    /// other assets' previews and are dropped under `strict_capture`
    /// (recorded under their own ids otherwise). Unattributed candidates
    /// belong to the current asset.
    async fn record_candidates(
        &self,
        profile: &SiteProfile,
        meta: &NewAsset,
        candidates: Vec<String>,
    ) {
        let eligible: Vec<String> = candidates
            .into_iter()
            .filter(|u| profile.allows_stream_host(u))
            .collect();
        if eligible.is_empty() {
            return;
        }

        let current_id = meta.asset_id.clone();
        let grouped = extract::group_by_asset_id(profile, &eligible);
        for (embedded_id, urls) in grouped {
            let Some(best) = resolve::pick_best(urls.iter().map(String::as_str)) else {
                continue;
            };
            let target_id = if embedded_id.is_empty() {
                // Lone unattributed stream belongs to the current asset
                current_id.clone()
            } else if !current_id.is_empty() && embedded_id != current_id {
                if self.config.strict_capture {
                    debug!(embedded_id, "skipping other asset's preview stream");
                    continue;
                }
                embedded_id
            } else {
                embedded_id
            };
            if target_id.is_empty() {
                continue;
            }
            self.record_stream(profile, &target_id, best, &meta.source_url).await;
        }
    }

    /// Records one stream candidate through the shared upsert/resolve
    /// path and emits discovery events.
    async fn record_stream(&self, profile: &SiteProfile, asset_id: &str, url: &str, source_url: &str) {
        let stream_meta = resolve::derive_stream_meta(url);
        let record = NewAsset {
            asset_id: asset_id.to_string(),
            source_url: source_url.to_string(),
            resolution: stream_meta.resolution.unwrap_or_default(),
            frame_rate: stream_meta.frame_rate.unwrap_or_default(),
            formats: stream_meta.format.unwrap_or_default(),
            stream_url: url.to_string(),
            source_site: profile.name.clone(),
            ..NewAsset::default()
        };

        let is_new = match self.store.upsert_asset(&record).await {
            Ok(is_new) => is_new,
            Err(error) => {
                warn!(asset_id, %error, "stream upsert failed");
                return;
            }
        };

        let recorded = if is_new {
            true
        } else {
            match self.store.upgrade_stream(asset_id, url).await {
                Ok(decision) => decision.recorded(),
                Err(error) => {
                    warn!(asset_id, %error, "stream resolve failed");
                    false
                }
            }
        };

        if recorded {
            self.events
                .log(LogLevel::Info, format!("stream {asset_id}: {url}"));
            if let Ok(Some(asset)) = self.store.get_asset(asset_id).await {
                self.events.emit(crate::events::Event::AssetDiscovered(Box::new(asset)));
            }
        }
    }

    // ==================== Catalog pages ====================

    /// Fetches a catalog (or generic) page: pagination, card extraction
    /// via three fallback strategies, link harvesting.
    async fn fetch_catalog(
        &self,
        session: &BrowserSession,
        profile: &SiteProfile,
        url: &str,
        depth: i64,
    ) -> Result<PageOutcome, FetchError> {
        let stream_re = profile.stream_url_regex();
        let page = session.open_page().await?;
        let capture = ResponseCapture::attach(&page, stream_re.clone()).await?;

        let result = self
            .fetch_catalog_inner(session, profile, &page, url, depth, &stream_re, capture)
            .await;
        let _ = page.close().await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_catalog_inner(
        &self,
        session: &BrowserSession,
        profile: &SiteProfile,
        page: &Page,
        url: &str,
        depth: i64,
        stream_re: &regex::Regex,
        capture: ResponseCapture,
    ) -> Result<PageOutcome, FetchError> {
        session
            .navigate(page, url, Duration::from_millis(self.config.timeout_ms))
            .await?;
        self.handle.sleep(jittered(Duration::from_millis(2000), 2.0)).await;

        if !self.challenge_gate(page).await {
            capture.detach();
            return Ok(PageOutcome::Challenged);
        }

        self.click_load_more(page, profile).await;
        self.scroll_to_bottom(page).await;

        // Strategy 1: embedded structured data blobs
        let html = page.content().await.unwrap_or_default();
        let structured = extract::extract_metadata(profile, &html, "", "");
        if !structured.stream_url.is_empty() {
            let id = profile
                .asset_id_of(&structured.stream_url)
                .or_else(|| profile.asset_id_of(url));
            if let Some(id) = id {
                self.record_stream(profile, &id, &structured.stream_url, url).await;
            }
        }

        // Strategy 2: card heuristics - <video> elements beside item links
        let cards: Vec<CardCapture> = eval_or_default(page, extract::CATALOG_CARDS_JS).await;
        let mut found = 0u32;
        for card in cards {
            if !stream_re.is_match(&card.src) || !profile.allows_stream_host(&card.src) {
                continue;
            }
            let Some(id) = profile.asset_id_of(&card.src) else {
                continue;
            };
            let source = if card.href.is_empty() { url } else { card.href.as_str() };
            self.record_stream(profile, &id, &card.src, source).await;
            found += 1;
        }

        // Strategy 3: intercepted API responses
        for captured in capture.detach() {
            if !profile.allows_stream_host(&captured) {
                continue;
            }
            let Some(id) = profile.asset_id_of(&captured) else {
                continue;
            };
            self.record_stream(profile, &id, &captured, url).await;
            found += 1;
        }
        if found > 0 {
            self.events
                .log(LogLevel::Info, format!("catalog extracted {found} card streams"));
        }

        let queued = self.harvest_links(page, profile, depth).await;
        Ok(PageOutcome::Processed { queued })
    }

    /// Clicks the profile's load-more control up to its click budget.
    async fn click_load_more(&self, page: &Page, profile: &SiteProfile) {
        let selector = &profile.pagination.load_more_selector;
        if selector.is_empty() || profile.pagination.load_more_clicks == 0 {
            return;
        }
        for click in 0..profile.pagination.load_more_clicks {
            if self.handle.is_stopping() {
                break;
            }
            let Ok(element) = page.find_element(selector.as_str()).await else {
                break;
            };
            if element.scroll_into_view().await.is_err() || element.click().await.is_err() {
                break;
            }
            debug!(click = click + 1, "load-more clicked");
            self.handle.sleep(jittered(Duration::from_millis(1500), 2.0)).await;
        }
    }

    // ==================== Shared fetch pieces ====================

    /// Challenge gate after navigation. Returns `true` when the page is
    /// clear (possibly after an interactive solve), `false` when the
    /// caller should re-enqueue and escalate.
    async fn challenge_gate(&self, page: &Page) -> bool {
        if !self.detect_challenge(page).await {
            return true;
        }

        self.events.status(CrawlStatus::Challenge);
        self.events
            .log(LogLevel::Warn, "Bot challenge detected - waiting for clearance...");

        if self.config.headless {
            // Nothing can solve it headless: cool down and move on
            self.events.log(
                LogLevel::Error,
                "Run with headless off to solve challenges manually.",
            );
            self.handle.sleep(HEADLESS_COOLDOWN).await;
            return false;
        }

        // Interactive: poll for the user solving it in the visible window
        let deadline = tokio::time::Instant::now() + CLEARANCE_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.handle.is_stopping() {
                return false;
            }
            self.handle.sleep(CLEARANCE_POLL).await;
            if !self.detect_challenge(page).await {
                self.events.log(LogLevel::Info, "Challenge cleared");
                self.events.status(CrawlStatus::Running);
                self.handle.sleep(Duration::from_secs(3)).await;
                return true;
            }
        }
        self.events
            .log(LogLevel::Error, "Challenge timeout - skipping page");
        false
    }

    /// Inspects title, visible text and known challenge markup.
    async fn detect_challenge(&self, page: &Page) -> bool {
        let title = page_title(page).await;
        let body: String = eval_or_default(page, extract::BODY_TEXT_JS).await;
        if looks_like_challenge(&title, &body) {
            return true;
        }
        page.find_element(super::challenge::CHALLENGE_SELECTOR)
            .await
            .is_ok()
    }

    /// Collects, normalizes, classifies and enqueues outbound links.
    async fn harvest_links(&self, page: &Page, profile: &SiteProfile, depth: i64) -> u32 {
        let links: Vec<String> = eval_or_default(page, extract::LINKS_JS).await;
        let mut queued = 0u32;
        let mut seen_here: Vec<String> = Vec::new();

        for link in links {
            let Some(normalized) = profile.normalize_url(&link) else {
                continue;
            };
            if seen_here.contains(&normalized) || profile.is_excluded(&normalized) {
                continue;
            }
            seen_here.push(normalized.clone());

            let Some((priority, next_depth)) =
                link_disposition(profile, &normalized, depth, self.config.max_depth)
            else {
                continue;
            };
            if self.config.resume && self.store.is_visited(&normalized).await.unwrap_or(false) {
                continue;
            }
            match self
                .store
                .enqueue(&normalized, next_depth, priority, &profile.name)
                .await
            {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(error) => warn!(url = %normalized, %error, "enqueue failed"),
            }
        }
        queued
    }

    /// Scrolls to the bottom in humanized increments.
    async fn scroll_to_bottom(&self, page: &Page) {
        let steps = self.config.scroll_steps;
        let base = Duration::from_millis(self.config.scroll_delay_ms);
        let mut progress: f64 = 0.0;

        for _ in 0..steps {
            if self.handle.is_stopping() {
                return;
            }
            let increment = rand::thread_rng().gen_range(0.04..0.12);
            progress = (progress + increment).min(1.0);
            // Occasional tiny scroll-back
            if rand::thread_rng().gen_range(0.0..1.0) < 0.1 && progress > 0.15 {
                progress -= rand::thread_rng().gen_range(0.02..0.05);
            }
            let script = format!(
                "window.scrollTo(0, document.documentElement.scrollHeight * {progress:.3})"
            );
            let _: serde_json::Value = eval_or_default(page, &script).await;
            self.handle
                .sleep(base.mul_f64(rand::thread_rng().gen_range(0.5..1.8)))
                .await;
        }
        let _: serde_json::Value =
            eval_or_default(page, "window.scrollTo(0, document.documentElement.scrollHeight)").await;
        self.handle.sleep(base).await;
    }
}

/// One catalog card captured in the page: a video source and the item
/// link wrapping it.
#[derive(Debug, Default, serde::Deserialize)]
struct CardCapture {
    #[serde(default)]
    src: String,
    #[serde(default)]
    href: String,
}

/// Decides whether and how a discovered link is enqueued.
///
/// Item links are prioritized above catalog links and are not
/// depth-limited; catalog links stop at `max_depth`; everything else is
/// dropped.
fn link_disposition(
    profile: &SiteProfile,
    url: &str,
    depth: i64,
    max_depth: i64,
) -> Option<(i64, i64)> {
    match profile.classify(url) {
        PageClass::Item => Some((ITEM_PRIORITY, depth + 1)),
        PageClass::Catalog if depth < max_depth => Some((CATALOG_PRIORITY, depth + 1)),
        PageClass::Catalog | PageClass::Generic => None,
    }
}

/// Uniform jitter in `[base, base * spread)`.
fn jittered(base: Duration, spread: f64) -> Duration {
    base.mul_f64(rand::thread_rng().gen_range(1.0..spread.max(1.01)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_parts() -> (Store, EventBus, ProfileRegistry) {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        (store, EventBus::default(), ProfileRegistry::with_builtins())
    }

    // ==================== Construction Tests ====================

    #[tokio::test]
    async fn test_unknown_profile_rejected_before_work() {
        let (store, events, registry) = test_parts().await;
        let config = Config {
            profiles: vec!["nonexistent".to_string()],
            ..Config::default()
        };
        let result = Crawler::new(store, events, config, &registry);
        assert!(matches!(result, Err(CrawlError::UnknownProfile(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_work() {
        let (store, events, registry) = test_parts().await;
        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        assert!(matches!(
            Crawler::new(store, events, config, &registry),
            Err(CrawlError::Config(_))
        ));
    }

    // ==================== Seeding Tests ====================

    #[tokio::test]
    async fn test_seed_enqueues_profile_start_urls() {
        let (store, events, registry) = test_parts().await;
        let crawler = Crawler::new(store.clone(), events, Config::default(), &registry).unwrap();
        crawler.seed().await.unwrap();

        assert_eq!(store.queue_size(Some("artlist")).await.unwrap(), 1);
        let item = store.dequeue(Some("artlist")).await.unwrap().unwrap();
        assert_eq!(item.priority, SEED_PRIORITY);
        assert_eq!(item.depth, 0);
    }

    #[tokio::test]
    async fn test_seed_start_url_override_single_profile() {
        let (store, events, registry) = test_parts().await;
        let config = Config {
            start_urls: vec!["https://artlist.io/stock-footage/search?tag=aerial".to_string()],
            ..Config::default()
        };
        let crawler = Crawler::new(store.clone(), events, config, &registry).unwrap();
        crawler.seed().await.unwrap();

        let item = store.dequeue(Some("artlist")).await.unwrap().unwrap();
        assert!(item.url.contains("tag=aerial"));
    }

    #[tokio::test]
    async fn test_seed_refetches_previously_done_start_url() {
        let (store, events, registry) = test_parts().await;
        let crawler = Crawler::new(store.clone(), events, Config::default(), &registry).unwrap();

        // Simulate a prior run that already visited the seed
        let seed_url = "https://artlist.io/stock-footage/";
        store
            .mark_visited(seed_url, 0, "artlist", VisitStatus::Done)
            .await
            .unwrap();

        crawler.seed().await.unwrap();
        assert!(!store.is_visited(seed_url).await.unwrap());
        assert_eq!(store.queue_size(Some("artlist")).await.unwrap(), 1);
    }

    // ==================== Handle Tests ====================

    #[test]
    fn test_handle_pause_resume_stop() {
        let handle = CrawlHandle::default();
        assert!(!handle.is_paused());
        handle.pause();
        assert!(handle.is_paused());
        handle.resume();
        assert!(!handle.is_paused());
        handle.stop();
        assert!(handle.is_stopping());
    }

    #[tokio::test]
    async fn test_handle_sleep_cancelled_by_stop() {
        let handle = CrawlHandle::default();
        let sleeper = handle.clone();
        let task = tokio::spawn(async move {
            sleeper.sleep(Duration::from_secs(60)).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        // The 60s sleep must be cancelled by stop well within a second
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    // ==================== Link disposition Tests ====================

    #[test]
    fn test_item_links_prioritized_and_unbounded() {
        let registry = ProfileRegistry::with_builtins();
        let profile = registry.get("artlist").unwrap();
        let item_url = "https://artlist.io/stock-footage/clip/ocean/288449";
        // Items enqueue even past max_depth
        assert_eq!(
            link_disposition(profile, item_url, 99, 2),
            Some((ITEM_PRIORITY, 100))
        );
    }

    #[test]
    fn test_catalog_links_depth_limited() {
        let registry = ProfileRegistry::with_builtins();
        let profile = registry.get("artlist").unwrap();
        let catalog_url = "https://artlist.io/stock-footage/search?tag=city";
        assert_eq!(
            link_disposition(profile, catalog_url, 1, 2),
            Some((CATALOG_PRIORITY, 2))
        );
        assert_eq!(link_disposition(profile, catalog_url, 2, 2), None);
    }

    #[test]
    fn test_generic_links_dropped() {
        let registry = ProfileRegistry::with_builtins();
        let profile = registry.get("pexels").unwrap();
        assert_eq!(
            link_disposition(profile, "https://www.pexels.com/about-us-page", 0, 2),
            None
        );
    }
}
