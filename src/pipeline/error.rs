//! Error types for the download pipeline.
//!
//! Every failure is classified into a closed kind at the point where it
//! happens - from an HTTP status code, a timeout, a statvfs result or a
//! process exit code - never inferred later from error text.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while executing one download job.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The reachability probe got an error status for the stream URL.
    #[error("stream probe returned HTTP {status} for {url}")]
    ProbeStatus {
        /// The stream URL probed.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The reachability probe timed out.
    #[error("stream probe timed out for {url}")]
    ProbeTimeout {
        /// The stream URL probed.
        url: String,
    },

    /// Network-level probe failure (DNS, connect, TLS).
    #[error("stream probe network error for {url}: {source}")]
    ProbeNetwork {
        /// The stream URL probed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Free disk space is below the configured floor.
    #[error("insufficient disk space in {dir}: {available_mb} MB free, floor is {floor_mb} MB")]
    DiskSpace {
        /// Output directory that was checked.
        dir: PathBuf,
        /// Megabytes available.
        available_mb: u64,
        /// Configured floor in megabytes.
        floor_mb: u64,
    },

    /// The asset carries no stream URL.
    #[error("asset {asset_id} has no stream URL")]
    MissingStream {
        /// The asset id.
        asset_id: String,
    },

    /// The remux binary could not be located.
    #[error("ffmpeg not found on PATH")]
    RemuxerNotFound,

    /// The remux child process failed to spawn.
    #[error("failed to spawn remux process: {source}")]
    Spawn {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The watchdog killed the remux process after a no-progress window.
    #[error("remux made no progress for {stalled_secs}s and was killed")]
    Stalled {
        /// Length of the silent window in seconds.
        stalled_secs: u64,
    },

    /// The remux process exited with a non-zero status.
    #[error("remux exited with status {code:?}")]
    ExitStatus {
        /// Process exit code, when the OS reported one.
        code: Option<i32>,
    },

    /// File system error around the output file.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The job was cancelled by pipeline shutdown.
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Creates a probe status error.
    pub fn probe_status(url: impl Into<String>, status: u16) -> Self {
        Self::ProbeStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a probe timeout error.
    pub fn probe_timeout(url: impl Into<String>) -> Self {
        Self::ProbeTimeout { url: url.into() }
    }

    /// Creates a probe network error.
    pub fn probe_network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::ProbeNetwork {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// Note on From trait implementations:
// No `From<reqwest::Error>` / `From<std::io::Error>` because the variants
// need context (url, path) the source errors don't carry. The helper
// constructors are the pattern here.
