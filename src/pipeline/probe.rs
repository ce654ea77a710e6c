//! Cheap reachability probe run before the heavy remux step.
//!
//! A ranged GET against the stream URL classifies dead streams before a
//! pool slot is spent on ffmpeg: a not-found/expired/forbidden/legal-block
//! response is permanent and short-circuits all retries, while timeouts
//! and server errors stay retryable. The response body is never consumed.

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;

/// Default probe timeout.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Reachability probe over a shared HTTP client.
#[derive(Debug, Clone)]
pub struct StreamProbe {
    client: reqwest::Client,
}

impl Default for StreamProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl StreamProbe {
    /// Creates a probe with the given per-request timeout.
    ///
    /// Falls back to a default-configured client if the builder fails
    /// (it only does so for invalid TLS/proxy setups).
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Probes a stream URL.
    ///
    /// Requests only the first byte; success means any 2xx (servers that
    /// ignore the Range header return 200, ranged ones 206).
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] classified at this point:
    /// [`DownloadError::ProbeStatus`] for error statuses,
    /// [`DownloadError::ProbeTimeout`] / [`DownloadError::ProbeNetwork`]
    /// for transport failures.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    DownloadError::probe_timeout(url)
                } else {
                    DownloadError::probe_network(url, error)
                }
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "probe response");
        if status.is_success() {
            Ok(())
        } else {
            Err(DownloadError::probe_status(url, status.as_u16()))
        }
    }
}
