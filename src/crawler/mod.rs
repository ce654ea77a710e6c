//! Crawl orchestration: the cooperative state machine that turns seed
//! URLs into a growing discovery graph.
//!
//! # Overview
//!
//! The crawler consists of:
//! - [`Crawler`] / [`CrawlHandle`] - the per-run state machine and its
//!   pause/resume/stop control surface
//! - [`BrowserSession`] / [`ResponseCapture`] - CDP plumbing with
//!   per-fetch scoped network listening
//! - challenge detection and the global backoff multiplier
//! - extraction helpers (metadata fallback chain, page-source scanning)
//!
//! Each cycle runs `Dequeue -> Classify -> Fetch -> ChallengeCheck ->
//! LinkExtraction -> Requeue`; the run ends when every active profile's
//! queue is empty. Only one page is fetched at a time per instance -
//! profile rotation provides fairness, the download pipeline provides
//! the parallelism.

mod browser;
mod challenge;
mod extract;
mod orchestrator;

pub use browser::{BrowserSession, FetchError, ResponseCapture};
pub use challenge::{looks_like_challenge, BackoffMultiplier};
pub use extract::{extract_metadata, group_by_asset_id, scan_html_for_streams};
pub use orchestrator::{CrawlError, CrawlHandle, Crawler};
