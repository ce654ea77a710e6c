//! Bot-challenge detection and the global backoff multiplier.
//!
//! A challenge is a mode, not an error: detection pushes the orchestrator
//! into a wait-or-cooldown path and escalates a pacing multiplier that is
//! global per orchestrator instance - a challenge signals site-wide
//! suspicion, not a page-local anomaly.

use std::time::Duration;

/// Markers seen in challenge interstitial titles and body text.
const CHALLENGE_MARKERS: &[&str] = &[
    "checking your browser",
    "just a moment",
    "verify you are human",
    "cloudflare",
    "captcha",
    "challenge-platform",
    "access denied",
    "please wait",
    "bot detection",
    "are you a robot",
];

/// CSS selector matching known challenge markup.
pub const CHALLENGE_SELECTOR: &str =
    "#challenge-form, #cf-challenge-running, .cf-browser-verification";

/// Characters of body text inspected; challenges announce themselves at
/// the top of the page.
pub const BODY_SCAN_CHARS: usize = 2000;

/// Fixed cooldown before moving on when a challenge cannot be solved
/// (headless mode).
pub const HEADLESS_COOLDOWN: Duration = Duration::from_secs(60);

/// Poll interval while waiting for interactive clearance.
pub const CLEARANCE_POLL: Duration = Duration::from_secs(2);

/// Upper bound on the interactive clearance wait.
pub const CLEARANCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Multiplier growth per detected challenge.
const GROWTH: f64 = 2.0;

/// Multiplier cap.
const CAP: f64 = 8.0;

/// Relaxation factor after a challenge-free fetch.
const RELAX: f64 = 0.7;

/// Multiplier floor: normal pacing.
const FLOOR: f64 = 1.0;

/// Checks page title and visible text for challenge markers.
///
/// The inputs are expected lower-cased by the caller only in the sense
/// that this function lower-cases them itself; pass them raw.
#[must_use]
pub fn looks_like_challenge(title: &str, body_text: &str) -> bool {
    let title = title.to_lowercase();
    let body: String = body_text.chars().take(BODY_SCAN_CHARS).collect();
    let body = body.to_lowercase();
    CHALLENGE_MARKERS
        .iter()
        .any(|marker| title.contains(marker) || body.contains(marker))
}

/// Escalating global delay multiplier applied to all fetch pacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffMultiplier {
    value: f64,
}

impl Default for BackoffMultiplier {
    fn default() -> Self {
        Self { value: FLOOR }
    }
}

impl BackoffMultiplier {
    /// Current multiplier, always in `[1.0, 8.0]`.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Doubles the multiplier after a detected challenge, capped.
    pub fn escalate(&mut self) {
        self.value = (self.value * GROWTH).min(CAP);
    }

    /// Relaxes the multiplier after a challenge-free fetch, floored.
    pub fn relax(&mut self) {
        self.value = (self.value * RELAX).max(FLOOR);
    }

    /// Scales a base delay by the current multiplier.
    #[must_use]
    pub fn scale(&self, base: Duration) -> Duration {
        base.mul_f64(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Detection Tests ====================

    #[test]
    fn test_detects_marker_in_title() {
        assert!(looks_like_challenge("Just a moment...", ""));
        assert!(looks_like_challenge("Attention Required! | Cloudflare", ""));
    }

    #[test]
    fn test_detects_marker_in_body() {
        assert!(looks_like_challenge(
            "Artlist",
            "Checking your browser before accessing artlist.io"
        ));
    }

    #[test]
    fn test_marker_beyond_scan_window_ignored() {
        let mut body = "a".repeat(BODY_SCAN_CHARS);
        body.push_str("captcha");
        assert!(!looks_like_challenge("Artlist", &body));
    }

    #[test]
    fn test_normal_page_not_flagged() {
        assert!(!looks_like_challenge(
            "Aerial coastline | Stock footage",
            "Download this clip in 4K. Related clips below."
        ));
    }

    // ==================== Multiplier Tests ====================

    #[test]
    fn test_escalate_doubles_and_caps() {
        let mut backoff = BackoffMultiplier::default();
        assert!((backoff.value() - 1.0).abs() < f64::EPSILON);

        backoff.escalate();
        assert!((backoff.value() - 2.0).abs() < f64::EPSILON);
        backoff.escalate();
        assert!((backoff.value() - 4.0).abs() < f64::EPSILON);
        backoff.escalate();
        backoff.escalate();
        backoff.escalate();
        assert!((backoff.value() - 8.0).abs() < f64::EPSILON, "capped at 8.0");
    }

    #[test]
    fn test_relax_decays_to_floor_only() {
        let mut backoff = BackoffMultiplier::default();
        backoff.escalate();
        let escalated = backoff.value();

        backoff.relax();
        assert!(backoff.value() < escalated);

        for _ in 0..20 {
            backoff.relax();
        }
        assert!((backoff.value() - 1.0).abs() < f64::EPSILON, "never below 1.0");
    }

    #[test]
    fn test_scale_applies_multiplier() {
        let mut backoff = BackoffMultiplier::default();
        backoff.escalate();
        assert_eq!(backoff.scale(Duration::from_millis(500)), Duration::from_secs(1));
    }
}
