//! Catalog harvest engine: parameter-sweeping bulk query client.
//!
//! Given a query template captured from one observed catalog API request
//! (endpoint, parameters, headers), the engine issues the same query
//! across a sweep of parameter variations - sort orders, category
//! toggles, search terms - concurrently, paginating each branch until an
//! empty response or a run of consecutive all-duplicate pages.
//!
//! Hits are deduplicated by asset id against a set seeded empty per run
//! and fed through the same store upsert / stream-resolution path as the
//! page crawler, so upgrade semantics are identical regardless of
//! discovery route.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::store::{NewAsset, Store, StoreError};

/// Concurrent sweep branches in flight.
const BRANCH_CONCURRENCY: usize = 4;

/// Consecutive all-duplicate pages before a branch terminates.
const DUPLICATE_RUN_LIMIT: u32 = 3;

/// Hard page bound per branch; a backstop against endless pagination.
const MAX_PAGES_PER_BRANCH: u32 = 500;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by the harvest engine.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The template is unusable.
    #[error("invalid harvest template: {0}")]
    Template(&'static str),

    /// HTTP client construction failed.
    #[error("harvest client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A captured query contract: one observed request generalized into a
/// sweepable template. Loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTemplate {
    /// Endpoint URL without query string.
    pub endpoint: String,
    /// Headers learned from the observed request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Base query parameters present on every request.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Name of the page-number parameter.
    #[serde(default = "default_page_param")]
    pub page_param: String,
    /// First page number the API accepts.
    #[serde(default = "default_first_page")]
    pub first_page: u32,
    /// Sweep axes: parameter name to the values tried for it. The
    /// cartesian product of all axes defines the branches.
    #[serde(default)]
    pub sweeps: BTreeMap<String, Vec<String>>,
    /// JSON pointer to the item array in a response.
    pub items_pointer: String,
    /// JSON pointer to the asset id inside one item.
    pub id_pointer: String,
    /// JSON pointer to the stream URL inside one item; empty records
    /// metadata only.
    #[serde(default)]
    pub stream_pointer: String,
    /// JSON pointers for metadata fields (`title`, `creator`,
    /// `duration`, `thumbnail_url`, ...) inside one item.
    #[serde(default)]
    pub field_pointers: BTreeMap<String, String>,
    /// Profile name recorded as the assets' source site.
    #[serde(default)]
    pub source_site: String,
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_first_page() -> u32 {
    1
}

impl QueryTemplate {
    /// Expands the sweep axes into concrete parameter sets, one per
    /// branch. No axes means a single branch with the base parameters.
    #[must_use]
    pub fn branches(&self) -> Vec<BTreeMap<String, String>> {
        let mut branches = vec![self.params.clone()];
        for (axis, values) in &self.sweeps {
            if values.is_empty() {
                continue;
            }
            let mut expanded = Vec::with_capacity(branches.len() * values.len());
            for branch in &branches {
                for value in values {
                    let mut next = branch.clone();
                    next.insert(axis.clone(), value.clone());
                    expanded.push(next);
                }
            }
            branches = expanded;
        }
        branches
    }

    /// Validates the template before a run.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Template`] on a missing endpoint or
    /// pointer.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.endpoint.is_empty() {
            return Err(HarvestError::Template("endpoint is empty"));
        }
        if self.items_pointer.is_empty() {
            return Err(HarvestError::Template("items_pointer is empty"));
        }
        if self.id_pointer.is_empty() {
            return Err(HarvestError::Template("id_pointer is empty"));
        }
        Ok(())
    }
}

/// Counters from one harvest run.
#[derive(Debug, Default)]
pub struct HarvestReport {
    /// Branches executed.
    pub branches: u64,
    /// Pages fetched across all branches.
    pub pages: u64,
    /// Items seen in responses.
    pub items: u64,
    /// Items dropped as duplicates of this run.
    pub duplicates: u64,
    /// New asset rows created.
    pub new_assets: u64,
    /// Stream candidates recorded (set or upgraded).
    pub streams: u64,
}

#[derive(Default)]
struct Counters {
    pages: AtomicU64,
    items: AtomicU64,
    duplicates: AtomicU64,
    new_assets: AtomicU64,
    streams: AtomicU64,
}

/// Parameter-sweeping bulk harvest client sharing the crawler's store.
pub struct HarvestEngine {
    store: Store,
    client: reqwest::Client,
}

impl HarvestEngine {
    /// Creates an engine over the shared store.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Client`] if the HTTP client cannot be
    /// built.
    pub fn new(store: Store) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()?;
        Ok(Self { store, client })
    }

    /// Runs a full sweep of the template.
    ///
    /// Branches run concurrently (bounded); each terminates independently
    /// on an empty response or [`DUPLICATE_RUN_LIMIT`] consecutive
    /// all-duplicate pages. Per-branch HTTP failures end that branch
    /// only, never the run.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Template`] for an unusable template.
    #[instrument(skip(self, template), fields(endpoint = %template.endpoint))]
    pub async fn run(&self, template: &QueryTemplate) -> Result<HarvestReport, HarvestError> {
        template.validate()?;

        // Dedup set seeded empty per run
        let seen: Arc<DashSet<String>> = Arc::new(DashSet::new());
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(BRANCH_CONCURRENCY));

        let branches = template.branches();
        let branch_count = branches.len() as u64;
        info!(branches = branch_count, "starting harvest sweep");

        let mut handles = Vec::with_capacity(branches.len());
        for params in branches {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let store = self.store.clone();
            let client = self.client.clone();
            let template = template.clone();
            let seen = Arc::clone(&seen);
            let counters = Arc::clone(&counters);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_branch(&store, &client, &template, params, &seen, &counters).await;
            }));
        }

        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "harvest branch panicked");
            }
        }

        let report = HarvestReport {
            branches: branch_count,
            pages: counters.pages.load(Ordering::SeqCst),
            items: counters.items.load(Ordering::SeqCst),
            duplicates: counters.duplicates.load(Ordering::SeqCst),
            new_assets: counters.new_assets.load(Ordering::SeqCst),
            streams: counters.streams.load(Ordering::SeqCst),
        };
        info!(
            pages = report.pages,
            items = report.items,
            new_assets = report.new_assets,
            streams = report.streams,
            "harvest sweep finished"
        );
        Ok(report)
    }
}

/// Paginates one parameter branch until it runs dry.
async fn run_branch(
    store: &Store,
    client: &reqwest::Client,
    template: &QueryTemplate,
    params: BTreeMap<String, String>,
    seen: &DashSet<String>,
    counters: &Counters,
) {
    let mut duplicate_run = 0u32;

    for page in template.first_page..template.first_page + MAX_PAGES_PER_BRANCH {
        let mut request = client.get(&template.endpoint);
        for (key, value) in &template.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let mut query: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let page_value = page.to_string();
        query.push((template.page_param.as_str(), page_value.as_str()));

        let response = match request.query(&query).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, page, "harvest request failed, ending branch");
                return;
            }
        };
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), page, "harvest page error, ending branch");
            return;
        }
        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, page, "harvest response not JSON, ending branch");
                return;
            }
        };

        counters.pages.fetch_add(1, Ordering::SeqCst);

        let items = body
            .pointer(&template.items_pointer)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if items.is_empty() {
            debug!(page, "empty harvest page, ending branch");
            return;
        }

        let mut fresh_on_page = 0u64;
        for item in &items {
            counters.items.fetch_add(1, Ordering::SeqCst);
            let Some(asset_id) = pointer_string(item, &template.id_pointer) else {
                continue;
            };
            if !seen.insert(asset_id.clone()) {
                counters.duplicates.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            fresh_on_page += 1;

            let record = item_to_record(item, &asset_id, template);
            match store.upsert_asset(&record).await {
                Ok(true) => {
                    counters.new_assets.fetch_add(1, Ordering::SeqCst);
                }
                Ok(false) => {
                    if let Err(error) = store.update_metadata(&asset_id, &record).await {
                        warn!(asset_id, %error, "harvest metadata merge failed");
                    }
                }
                Err(error) => {
                    warn!(asset_id, %error, "harvest upsert failed");
                    continue;
                }
            }

            // Same upgrade semantics as the page crawler
            if !record.stream_url.is_empty() {
                match store.upgrade_stream(&asset_id, &record.stream_url).await {
                    Ok(decision) if decision.recorded() => {
                        counters.streams.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(error) => warn!(asset_id, %error, "harvest stream resolve failed"),
                }
            }
        }

        if fresh_on_page == 0 {
            duplicate_run += 1;
            if duplicate_run >= DUPLICATE_RUN_LIMIT {
                debug!(page, "duplicate run limit reached, ending branch");
                return;
            }
        } else {
            duplicate_run = 0;
        }
    }
}

/// Builds an asset record from one response item via the template's
/// field pointers.
fn item_to_record(item: &serde_json::Value, asset_id: &str, template: &QueryTemplate) -> NewAsset {
    let mut record = NewAsset::with_id(asset_id);
    record.source_site = template.source_site.clone();
    if !template.stream_pointer.is_empty()
        && let Some(stream) = pointer_string(item, &template.stream_pointer)
    {
        record.stream_url = stream;
    }
    for (field, pointer) in &template.field_pointers {
        let Some(value) = pointer_string(item, pointer) else {
            continue;
        };
        match field.as_str() {
            "title" => record.title = value,
            "creator" => record.creator = value,
            "collection" => record.collection = value,
            "resolution" => record.resolution = value,
            "duration" => record.duration = value,
            "frame_rate" => record.frame_rate = value,
            "camera" => record.camera = value,
            "formats" => record.formats = value,
            "tags" => record.tags = value,
            "thumbnail_url" => record.thumbnail_url = value,
            "source_url" => record.source_url = value,
            other => debug!(field = other, "unknown harvest field pointer"),
        }
    }
    record
}

/// Reads a JSON pointer as a string, accepting numbers too (asset ids
/// are numeric in most catalog APIs).
fn pointer_string(value: &serde_json::Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
