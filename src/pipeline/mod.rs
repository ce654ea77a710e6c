//! Download pipeline: bounded-concurrency workers turning assets with
//! resolved stream URLs into local files.
//!
//! # Overview
//!
//! The pipeline is the one genuinely parallel subsystem. A submission
//! loop continuously tops up a semaphore-bounded pool from a thread-safe
//! queue; each job owns its own external remux process. Per job:
//!
//! 1. A cheap reachability probe classifies dead streams before the
//!    heavy remux step ([`StreamProbe`]).
//! 2. A free-disk-space guard refuses to start below a fixed floor.
//! 3. ffmpeg stream-copies the remote stream under a no-progress
//!    watchdog ([`Remuxer`]).
//! 4. On success a JSON sidecar is written, the asset row is updated and
//!    a best-effort thumbnail is extracted.
//!
//! Transient failures retry with capped exponential backoff; permanent
//! failures and retry exhaustion settle to `error` with a human-readable
//! reason. The seen-set is pre-seeded from assets already marked done,
//! preventing re-downloads across restarts.

mod error;
mod filename;
mod probe;
mod remux;
mod retry;

pub use error::DownloadError;
pub use filename::apply_template;
pub use probe::StreamProbe;
pub use remux::{parse_duration_field, RemuxProgress, Remuxer};
pub use retry::{classify_error, FailureKind, RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::sidecar;
use crate::store::{Asset, DownloadStatus, Store, StoreError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 16;

/// Default concurrent download jobs.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Free-space floor below which jobs refuse to start.
const DEFAULT_DISK_FLOOR_MB: u64 = 500;

/// Grace period for pool drain on shutdown, per outstanding job.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Idle wait before the submission loop declares the queue dry.
const IDLE_GRACE: Duration = Duration::from_secs(1);

/// Minimum interval between progress events per job.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Error type for pipeline construction and queue scans.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The remux binary is missing.
    #[error("remuxer unavailable: {0}")]
    Remuxer(#[from] DownloadError),
}

/// Pipeline tuning knobs, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory downloads land in.
    pub output_dir: PathBuf,
    /// Concurrent jobs.
    pub concurrency: usize,
    /// Retries beyond the initial attempt for transient failures.
    pub max_retries: u32,
    /// Filename template (see [`apply_template`]).
    pub filename_template: String,
    /// Free-space floor in megabytes; 0 disables the guard.
    pub disk_floor_mb: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("archive"),
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            filename_template: "{title}".to_string(),
            disk_floor_mb: DEFAULT_DISK_FLOOR_MB,
        }
    }
}

impl PipelineConfig {
    /// Derives pipeline settings from the run configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            concurrency: config.concurrency,
            max_retries: config.max_retries,
            filename_template: config.filename_template.clone(),
            disk_floor_mb: DEFAULT_DISK_FLOOR_MB,
        }
    }
}

/// Statistics from a pipeline run.
///
/// Uses atomic counters for thread-safe updates from concurrent jobs.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs that settled to error.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of retry attempts made.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency download pipeline.
///
/// # Concurrency Model
///
/// - Each job runs in its own Tokio task holding a semaphore permit
/// - The submission loop tops up the pool from an unbounded channel
/// - Stop sets a flag, cancels in-flight remux children and waits a
///   bounded grace period for the pool to drain
pub struct DownloadPipeline {
    store: Store,
    events: EventBus,
    config: PipelineConfig,
    probe: StreamProbe,
    remuxer: Remuxer,
    retry_policy: RetryPolicy,
    seen: Arc<DashSet<String>>,
    queue_tx: mpsc::UnboundedSender<Asset>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Asset>>,
    semaphore: Arc<Semaphore>,
    stopping: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    stats: Arc<DownloadStats>,
}

impl DownloadPipeline {
    /// Creates a pipeline, locating ffmpeg on PATH.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] for an out-of-range
    /// pool size and [`PipelineError::Remuxer`] when ffmpeg is missing.
    pub fn new(
        store: Store,
        events: EventBus,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let remuxer = Remuxer::locate()?;
        Self::with_parts(store, events, config, StreamProbe::default(), remuxer)
    }

    /// Creates a pipeline over explicit probe/remuxer instances.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConcurrency`] for an out-of-range
    /// pool size.
    pub fn with_parts(
        store: Store,
        events: EventBus,
        config: PipelineConfig,
        probe: StreamProbe,
        remuxer: Remuxer,
    ) -> Result<Self, PipelineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(PipelineError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        debug!(
            concurrency = config.concurrency,
            max_retries = config.max_retries,
            "creating download pipeline"
        );

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let retry_policy = RetryPolicy::with_max_retries(config.max_retries);
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        Ok(Self {
            store,
            events,
            config,
            probe,
            remuxer,
            retry_policy,
            seen: Arc::new(DashSet::new()),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            semaphore,
            stopping: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Notify::new()),
            stats: Arc::new(DownloadStats::default()),
        })
    }

    /// Seeds the seen-set from assets already marked done, preventing
    /// re-downloads across restarts. Call once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the scan fails.
    #[instrument(skip(self))]
    pub async fn preload_seen(&self) -> Result<usize, PipelineError> {
        let done = self.store.assets_with_streams(false, i64::MAX).await?;
        let mut count = 0;
        for asset in done {
            if asset.download_status() == DownloadStatus::Done && !asset.local_path.is_empty() {
                self.seen.insert(asset.asset_id);
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "seen-set pre-seeded with completed downloads");
        }
        Ok(count)
    }

    /// Adds an asset to the download queue.
    ///
    /// Returns `false` when the asset was already seen (queued, running
    /// or completed earlier) or lacks a stream URL. Two enqueues for the
    /// same asset before its first job completes yield exactly one job.
    #[instrument(skip(self, asset), fields(asset_id = %asset.asset_id))]
    pub fn enqueue(&self, asset: &Asset) -> bool {
        if asset.asset_id.is_empty() || asset.stream_url.is_empty() {
            return false;
        }
        if !self.seen.insert(asset.asset_id.clone()) {
            debug!("asset already seen, not enqueued");
            return false;
        }
        // Send only fails when the pipeline is gone entirely
        self.queue_tx.send(asset.clone()).is_ok()
    }

    /// Scans the store for assets with a stream URL and no completed
    /// download and enqueues each. Returns the number enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the scan fails.
    #[instrument(skip(self))]
    pub async fn enqueue_pending(&self) -> Result<usize, PipelineError> {
        let pending = self.store.assets_with_streams(true, i64::MAX).await?;
        let mut count = 0;
        for asset in pending {
            if self.enqueue(&asset) {
                count += 1;
            }
        }
        info!(count, "queued pending downloads from store");
        Ok(count)
    }

    /// Returns the shared stats counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        Arc::clone(&self.stats)
    }

    /// Requests shutdown: stops the submission loop and terminates
    /// in-flight remux children. [`DownloadPipeline::run`] then drains
    /// the pool within a bounded grace period.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    /// Runs the submission loop until the queue stays dry or
    /// [`DownloadPipeline::stop`] is called, then drains the pool.
    ///
    /// Individual job failures never abort the run; they are counted and
    /// surfaced as events.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        let mut rx = self.queue_rx.lock().await;
        let mut handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        info!("download pipeline started");

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let next = tokio::time::timeout(IDLE_GRACE, rx.recv()).await;
            match next {
                Ok(Some(asset)) => {
                    let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    handles.retain(|h| !h.is_finished());

                    let job = JobContext {
                        store: self.store.clone(),
                        events: self.events.clone(),
                        config: self.config.clone(),
                        probe: self.probe.clone(),
                        remuxer: self.remuxer.clone(),
                        retry_policy: self.retry_policy.clone(),
                        stopping: Arc::clone(&self.stopping),
                        cancel: Arc::clone(&self.cancel),
                        stats: Arc::clone(&self.stats),
                    };
                    handles.push(tokio::spawn(async move {
                        let _permit = permit;
                        job.run(asset).await;
                    }));
                }
                Ok(None) => break,
                Err(_) => {
                    handles.retain(|h| !h.is_finished());
                    if handles.is_empty() {
                        // Queue dry and pool idle: the run is over
                        break;
                    }
                }
            }
        }

        debug!(outstanding = handles.len(), "draining download pool");
        for handle in handles {
            if let Err(error) = tokio::time::timeout(DRAIN_GRACE, handle).await {
                warn!(%error, "download job did not drain within grace period");
            }
        }

        info!(
            completed = self.stats.completed(),
            failed = self.stats.failed(),
            retried = self.stats.retried(),
            "download pipeline finished"
        );
    }
}

/// Everything one job needs, cloned out of the pipeline so the task
/// borrows nothing.
struct JobContext {
    store: Store,
    events: EventBus,
    config: PipelineConfig,
    probe: StreamProbe,
    remuxer: Remuxer,
    retry_policy: RetryPolicy,
    stopping: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    stats: Arc<DownloadStats>,
}

impl JobContext {
    /// Executes one job with retry, settling the asset row and emitting
    /// a single completion event.
    async fn run(&self, asset: Asset) {
        let asset_id = asset.asset_id.clone();
        if let Err(error) = self
            .store
            .set_download_status(&asset_id, DownloadStatus::Downloading)
            .await
        {
            warn!(asset_id, %error, "failed to mark asset downloading");
        }

        let mut attempt = 0u32;
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }
            attempt += 1;

            match self.execute_attempt(&asset).await {
                Ok(path) => {
                    self.finish_success(&asset_id, &path).await;
                    return;
                }
                Err(DownloadError::Cancelled) => return,
                Err(error) => {
                    let kind = classify_error(&error);
                    match self.retry_policy.should_retry(kind, attempt) {
                        RetryDecision::Retry { delay, attempt: next } => {
                            info!(
                                asset_id,
                                attempt = next,
                                delay_ms = delay.as_millis(),
                                %error,
                                "retrying download"
                            );
                            self.stats.increment_retried();
                            self.events.emit(Event::DownloadProgress {
                                asset_id: asset_id.clone(),
                                percent: 0,
                                status_text: format!(
                                    "Retry {next} in {}s...",
                                    delay.as_secs().max(1)
                                ),
                            });
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            warn!(asset_id, %error, attempt, %reason, "download settled to error");
                            self.finish_failure(&asset_id, &error, attempt).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One attempt: probe, disk guard, remux.
    async fn execute_attempt(&self, asset: &Asset) -> Result<PathBuf, DownloadError> {
        // Re-read the row: the crawler may have upgraded the stream URL
        // between enqueue and execution
        let fresh = self
            .store
            .get_asset(&asset.asset_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| asset.clone());

        if fresh.stream_url.is_empty() {
            return Err(DownloadError::MissingStream {
                asset_id: fresh.asset_id.clone(),
            });
        }

        // Already on disk from an earlier run
        if fresh.download_status() == DownloadStatus::Done
            && !fresh.local_path.is_empty()
            && Path::new(&fresh.local_path).is_file()
        {
            return Ok(PathBuf::from(&fresh.local_path));
        }

        // 1. Reachability probe classifies dead streams before the heavy step
        self.probe.probe(&fresh.stream_url).await?;

        // 2. Free-disk-space guard
        check_disk_space(&self.config.output_dir, self.config.disk_floor_mb)?;

        let relative = apply_template(&self.config.filename_template, &fresh, ".mp4");
        let out_path = self.config.output_dir.join(relative);

        // Existing non-trivial file: adopt it instead of re-copying
        if let Ok(metadata) = std::fs::metadata(&out_path)
            && metadata.len() > 1024
        {
            debug!(asset_id = fresh.asset_id, "output file already exists");
            return Ok(out_path);
        }

        // 3. External remux under watchdog, with progress forwarding
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(
            self.events.clone(),
            fresh.asset_id.clone(),
            out_path.clone(),
            progress_rx,
        ));

        let known_duration = parse_duration_field(&fresh.duration);
        let result = self
            .remuxer
            .remux(
                &fresh.stream_url,
                &out_path,
                known_duration,
                &progress_tx,
                &self.cancel,
            )
            .await;
        drop(progress_tx);
        let _ = forwarder.await;

        result.map(|()| out_path)
    }

    /// 4. Success bookkeeping: sidecar, asset row, best-effort thumbnail.
    async fn finish_success(&self, asset_id: &str, path: &Path) {
        if let Ok(Some(fresh)) = self.store.get_asset(asset_id).await
            && let Err(error) = sidecar::write_sidecar(&fresh, path)
        {
            warn!(asset_id, %error, "sidecar write failed");
        }

        if let Err(error) = self
            .store
            .update_local_path(asset_id, path, DownloadStatus::Done)
            .await
        {
            warn!(asset_id, %error, "failed to record completed download");
        }

        let thumb = thumbnail_path(path, asset_id);
        match self.remuxer.extract_thumbnail(path, &thumb).await {
            Ok(()) => {
                if let Err(error) = self.store.update_thumb_path(asset_id, &thumb).await {
                    warn!(asset_id, %error, "failed to record thumbnail path");
                }
            }
            Err(error) => debug!(asset_id, %error, "thumbnail extraction failed"),
        }

        self.stats.increment_completed();
        info!(asset_id, path = %path.display(), "download completed");
        self.events.emit(Event::DownloadProgress {
            asset_id: asset_id.to_string(),
            percent: 100,
            status_text: "Done".to_string(),
        });
        self.events.emit(Event::DownloadComplete {
            asset_id: asset_id.to_string(),
            success: true,
            path_or_reason: path.to_string_lossy().into_owned(),
        });
    }

    /// Terminal failure bookkeeping.
    async fn finish_failure(&self, asset_id: &str, error: &DownloadError, attempts: u32) {
        if let Err(store_error) = self
            .store
            .set_download_status(asset_id, DownloadStatus::Error)
            .await
        {
            warn!(asset_id, %store_error, "failed to mark asset errored");
        }
        self.stats.increment_failed();
        let reason = format!("{error} (after {attempts} attempt{})", plural(attempts));
        self.events.emit(Event::DownloadProgress {
            asset_id: asset_id.to_string(),
            percent: 0,
            status_text: format!("Error: {error}"),
        });
        self.events.emit(Event::DownloadComplete {
            asset_id: asset_id.to_string(),
            success: false,
            path_or_reason: reason,
        });
    }
}

fn plural(n: u32) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Turns raw remux observations into throttled progress events with
/// percent, throughput and ETA.
async fn forward_progress(
    events: EventBus,
    asset_id: String,
    out_path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<RemuxProgress>,
) {
    let start = Instant::now();
    let mut last_emit: Option<Instant> = None;

    while let Some(progress) = rx.recv().await {
        if let Some(last) = last_emit
            && last.elapsed() < PROGRESS_INTERVAL
        {
            continue;
        }
        last_emit = Some(Instant::now());

        let percent = progress
            .total_secs
            .filter(|total| *total > 0.0)
            .map_or(0, |total| {
                ((progress.media_secs / total) * 100.0).min(99.0) as u8
            });

        let wall = start.elapsed().as_secs_f64();
        let mut parts = vec![format!("{percent}%")];
        if wall > 1.0
            && let Ok(metadata) = std::fs::metadata(&out_path)
        {
            let speed = metadata.len() as f64 / wall;
            if speed > 1_000_000.0 {
                parts.push(format!("{:.1} MB/s", speed / 1_000_000.0));
            } else if speed > 1000.0 {
                parts.push(format!("{:.0} KB/s", speed / 1000.0));
            }
        }
        if percent > 0 && wall > 1.0 {
            let eta = (wall / f64::from(percent)) * f64::from(100 - percent);
            if eta < 60.0 {
                parts.push(format!("{eta:.0}s left"));
            } else {
                parts.push(format!("{:.1}m left", eta / 60.0));
            }
        }

        events.emit(Event::DownloadProgress {
            asset_id: asset_id.clone(),
            percent,
            status_text: parts.join("  |  "),
        });
    }
}

/// Derives the thumbnail path: `<media dir>/../thumbs/<asset_id>.jpg`,
/// or a sibling `thumbs/` directory when there is no parent.
fn thumbnail_path(media_path: &Path, asset_id: &str) -> PathBuf {
    let base = media_path
        .parent()
        .map_or_else(|| PathBuf::from("thumbs"), |p| p.join("../thumbs"));
    base.join(format!("{asset_id}.jpg"))
}

/// Refuses to start a job when free space is below the floor.
///
/// The guard is a no-op when the floor is zero or free space cannot be
/// determined on this platform.
fn check_disk_space(dir: &Path, floor_mb: u64) -> Result<(), DownloadError> {
    if floor_mb == 0 {
        return Ok(());
    }
    match free_space_mb(dir) {
        Some(available_mb) if available_mb < floor_mb => Err(DownloadError::DiskSpace {
            dir: dir.to_path_buf(),
            available_mb,
            floor_mb,
        }),
        _ => Ok(()),
    }
}

/// Free megabytes on the filesystem holding `dir` (unix statvfs).
#[cfg(unix)]
fn free_space_mb(dir: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;

    // Walk up to the nearest existing ancestor so the guard works before
    // the output directory is created
    let mut probe_dir = dir;
    while !probe_dir.exists() {
        probe_dir = probe_dir.parent()?;
    }

    let c_path = std::ffi::CString::new(probe_dir.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    #[allow(clippy::unnecessary_cast)]
    let bytes = (stat.f_bavail as u64) * (stat.f_frsize as u64);
    Some(bytes / (1024 * 1024))
}

/// Free space is unknown off-unix; the guard disables itself.
#[cfg(not(unix))]
fn free_space_mb(_dir: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::NewAsset;

    async fn test_store() -> Store {
        Store::new(Database::new_in_memory().await.unwrap())
    }

    fn test_pipeline(store: Store, config: PipelineConfig) -> DownloadPipeline {
        DownloadPipeline::with_parts(
            store,
            EventBus::default(),
            config,
            StreamProbe::default(),
            Remuxer::new(PathBuf::from("/bin/false"), Duration::from_secs(5)),
        )
        .unwrap()
    }

    fn streamed_asset(id: &str) -> Asset {
        Asset {
            asset_id: id.to_string(),
            title: format!("Clip {id}"),
            stream_url: format!("https://cdn.example.com/video-files/{id}/1920_1080_25fps.mp4"),
            ..Asset::default()
        }
    }

    // ==================== Construction Tests ====================

    #[tokio::test]
    async fn test_invalid_concurrency_rejected() {
        let store = test_store().await;
        let config = PipelineConfig {
            concurrency: 0,
            ..PipelineConfig::default()
        };
        let result = DownloadPipeline::with_parts(
            store.clone(),
            EventBus::default(),
            config,
            StreamProbe::default(),
            Remuxer::new(PathBuf::from("/bin/false"), Duration::from_secs(5)),
        );
        assert!(matches!(
            result,
            Err(PipelineError::InvalidConcurrency { value: 0 })
        ));

        let config = PipelineConfig {
            concurrency: MAX_CONCURRENCY + 1,
            ..PipelineConfig::default()
        };
        let result = DownloadPipeline::with_parts(
            store,
            EventBus::default(),
            config,
            StreamProbe::default(),
            Remuxer::new(PathBuf::from("/bin/false"), Duration::from_secs(5)),
        );
        assert!(matches!(result, Err(PipelineError::InvalidConcurrency { .. })));
    }

    // ==================== Enqueue Tests ====================

    #[tokio::test]
    async fn test_enqueue_rejects_streamless_and_duplicates() {
        let store = test_store().await;
        let pipeline = test_pipeline(store, PipelineConfig::default());

        let no_stream = Asset {
            asset_id: "1".to_string(),
            ..Asset::default()
        };
        assert!(!pipeline.enqueue(&no_stream));

        let asset = streamed_asset("2");
        assert!(pipeline.enqueue(&asset));
        // Second enqueue before completion: exactly one job
        assert!(!pipeline.enqueue(&asset));
    }

    #[tokio::test]
    async fn test_preload_seen_blocks_redownload() {
        let store = test_store().await;
        let mut record = NewAsset::with_id("77");
        record.stream_url = "https://cdn.example.com/77.m3u8".to_string();
        store.upsert_asset(&record).await.unwrap();
        store
            .update_local_path("77", Path::new("/archive/77.mp4"), DownloadStatus::Done)
            .await
            .unwrap();

        let pipeline = test_pipeline(store.clone(), PipelineConfig::default());
        assert_eq!(pipeline.preload_seen().await.unwrap(), 1);

        let asset = store.get_asset("77").await.unwrap().unwrap();
        assert!(!pipeline.enqueue(&asset));
    }

    // ==================== Stats Tests ====================

    #[test]
    fn test_download_stats_counters() {
        let stats = DownloadStats::default();
        stats.increment_completed();
        stats.increment_completed();
        stats.increment_failed();
        stats.increment_retried();
        assert_eq!(stats.completed(), 2);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.retried(), 1);
    }

    // ==================== Disk guard Tests ====================

    #[test]
    fn test_disk_guard_disabled_at_zero_floor() {
        check_disk_space(Path::new("/"), 0).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_free_space_reported_for_existing_dir() {
        assert!(free_space_mb(Path::new("/")).is_some());
    }

    #[test]
    #[cfg(unix)]
    fn test_disk_guard_fails_at_absurd_floor() {
        let err = check_disk_space(Path::new("/"), u64::MAX).unwrap_err();
        assert!(matches!(err, DownloadError::DiskSpace { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn test_free_space_walks_to_existing_ancestor() {
        assert!(free_space_mb(Path::new("/definitely/not/created/yet")).is_some());
    }

    // ==================== Helper Tests ====================

    #[test]
    fn test_thumbnail_path_shape() {
        let thumb = thumbnail_path(Path::new("/archive/clips/a_1.mp4"), "1");
        assert!(thumb.to_string_lossy().ends_with("thumbs/1.jpg"));
    }
}
