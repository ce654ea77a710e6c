//! Retry logic with exponential backoff for transient download failures.
//!
//! When a job fails, the [`DownloadError`] is classified into a
//! [`FailureKind`]:
//! - [`FailureKind::Transient`] - may succeed on retry (timeouts, server
//!   errors, stalled or non-zero-exit remux runs)
//! - [`FailureKind::Permanent`] - retrying cannot help (gone/forbidden
//!   streams, disk-space refusal, cancellation)
//!
//! The [`RetryPolicy`] then decides whether to retry based on kind and
//! attempt count, calculating exponential backoff delays with jitter.
//! A job configured with `max_retries = R` is attempted exactly `R + 1`
//! times when every failure is transient, and exactly once when the first
//! failure is permanent.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum retry attempts (beyond the initial one).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (30 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification determining whether a retry can possibly help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// Failure that won't succeed regardless of retries.
    Permanent,
}

/// Decision on whether to retry a failed download job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^attempt, max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` counts the initial attempt and must be >= 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy allowing `max_retries` retries beyond the initial
    /// attempt, using defaults for timing.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry a failed job.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if kind == FailureKind::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt is 0-indexed for the exponent (attempt 1 = 2^0 = 1x base)
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * multiplier.powf(exponent);

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Generates random jitter between 0 and `MAX_JITTER`.
    ///
    /// Jitter prevents a thundering herd when multiple jobs fail
    /// simultaneously and retry at the same time.
    fn calculate_jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a download error into a failure kind for retry decisions.
///
/// # HTTP probe status classification
///
/// | Status | Kind | Rationale |
/// |--------|------|-----------|
/// | 403 | Permanent | Signed URL expired or region-blocked |
/// | 404 | Permanent | Stream no longer exists |
/// | 410 | Permanent | Gone - permanently removed |
/// | 451 | Permanent | Legal block - won't succeed |
/// | 408/429 | Transient | Timeout / rate pressure may clear |
/// | 5xx | Transient | Server error may be temporary |
/// | other 4xx | Permanent | Request itself is wrong |
///
/// # Non-status failures
///
/// Timeouts, network blips, stalled and non-zero-exit remux runs are
/// transient; disk-space refusal, missing binaries, spawn and IO errors,
/// missing streams and cancellation are permanent.
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureKind {
    match error {
        DownloadError::ProbeStatus { status, .. } => classify_probe_status(*status),

        DownloadError::ProbeTimeout { .. }
        | DownloadError::ProbeNetwork { .. }
        | DownloadError::Stalled { .. }
        | DownloadError::ExitStatus { .. } => FailureKind::Transient,

        DownloadError::DiskSpace { .. }
        | DownloadError::MissingStream { .. }
        | DownloadError::RemuxerNotFound
        | DownloadError::Spawn { .. }
        | DownloadError::Io { .. }
        | DownloadError::Cancelled => FailureKind::Permanent,
    }
}

/// Classifies an HTTP probe status code into a failure kind.
#[allow(clippy::match_same_arms)]
fn classify_probe_status(status: u16) -> FailureKind {
    match status {
        403 => FailureKind::Permanent, // Forbidden / expired signature
        404 => FailureKind::Permanent, // Not Found
        410 => FailureKind::Permanent, // Gone
        451 => FailureKind::Permanent, // Unavailable For Legal Reasons
        408 => FailureKind::Transient, // Request Timeout
        429 => FailureKind::Transient, // Too Many Requests

        status if (500..600).contains(&status) => FailureKind::Transient,
        status if (400..500).contains(&status) => FailureKind::Permanent,

        // Anything else is unexpected, treat as permanent
        _ => FailureKind::Permanent,
    }
}
