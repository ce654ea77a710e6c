//! Stream-quality scoring and upgrade decisions.
//!
//! Candidate stream URLs carry quality information in their filenames:
//! an explicit `{width}_{height}_{fps}fps` pattern, a quality-tier token
//! (`-uhd_`, `-hd_`, `-sd_`), or an `.m3u8` extension marking an adaptive
//! manifest. [`score`] turns that into a single integer so that
//! [`resolve`] can decide whether a newly discovered URL should replace
//! the one already stored for an asset.
//!
//! Both the page crawler and the catalog harvest path route every
//! candidate through [`resolve`], so upgrade semantics are identical
//! regardless of how a stream was discovered.

use std::sync::LazyLock;

use regex::Regex;

use crate::util::compile_static_regex;

/// Filename pattern carrying explicit width/height/frame-rate.
static RES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(\d{3,4})_(\d{3,4})_(\d+)fps"));

/// Quality-tier token in the filename (`-uhd_`, `-hd_`, `-sd_`).
static TIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?i)-(uhd|hd|sd)_"));

/// Score assigned to a `uhd`-tagged URL when no explicit resolution is present.
const SCORE_UHD: u32 = 2560;

/// Score assigned to an `-hd_`-tagged URL.
const SCORE_HD: u32 = 1080;

/// Score assigned to an `-sd_`-tagged URL.
const SCORE_SD: u32 = 360;

/// Adaptive manifests carry every rendition, so they are presumed high
/// quality - above HD, below an explicit UHD file.
const SCORE_ADAPTIVE_MANIFEST: u32 = 2000;

/// Floor score for any recognizable stream URL without quality markers.
const SCORE_UNKNOWN: u32 = 100;

/// Outcome of comparing a candidate stream URL against the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDecision {
    /// No URL was stored; the candidate becomes the first one.
    SetNew,
    /// Candidate is byte-identical to the stored URL.
    Same,
    /// Candidate scored strictly higher and replaces the stored URL.
    Upgraded,
    /// Candidate scored lower or equal; the stored URL is kept.
    Kept,
    /// No asset exists under the given id (store-level outcome).
    NotFound,
}

impl StreamDecision {
    /// True when the candidate ended up stored (first URL or upgrade).
    #[must_use]
    pub fn recorded(&self) -> bool {
        matches!(self, Self::SetNew | Self::Upgraded)
    }
}

/// Quality metadata re-derived from a candidate URL's filename.
///
/// Best effort: any field the filename doesn't encode stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMeta {
    /// `"1920x1080"`-style resolution string.
    pub resolution: Option<String>,
    /// Frame rate in frames per second, as the filename spells it.
    pub frame_rate: Option<String>,
    /// Upper-cased quality tier (`UHD`, `HD`, `SD`).
    pub format: Option<String>,
}

/// Scores a stream URL by quality. Higher is better.
///
/// Priority order: explicit `WxH` in the filename beats a quality-tier
/// token beats the adaptive-manifest fallback beats the unknown floor.
#[must_use]
pub fn score(url: &str) -> u32 {
    if url.is_empty() {
        return 0;
    }
    if let Some(caps) = RES_PATTERN.captures(url) {
        let w: u32 = caps[1].parse().unwrap_or(0);
        let h: u32 = caps[2].parse().unwrap_or(0);
        return w.max(h);
    }
    let lower = url.to_lowercase();
    if lower.contains("-uhd_") || lower.contains("uhd") {
        return SCORE_UHD;
    }
    if lower.contains("-hd_") {
        return SCORE_HD;
    }
    if lower.contains("-sd_") {
        return SCORE_SD;
    }
    if lower.contains(".m3u8") {
        return SCORE_ADAPTIVE_MANIFEST;
    }
    SCORE_UNKNOWN
}

/// Decides whether `candidate` should replace `existing`.
///
/// `existing` of `None` or empty string means no URL is stored yet.
/// The stored URL is only ever replaced by a strictly higher-scored
/// candidate, making stream quality monotonic over any call sequence.
#[must_use]
pub fn resolve(existing: Option<&str>, candidate: &str) -> StreamDecision {
    let existing = existing.unwrap_or("");
    if existing.is_empty() {
        return StreamDecision::SetNew;
    }
    if existing == candidate {
        return StreamDecision::Same;
    }
    if score(candidate) > score(existing) {
        StreamDecision::Upgraded
    } else {
        StreamDecision::Kept
    }
}

/// Re-derives resolution, frame rate and format tier from a URL filename.
#[must_use]
pub fn derive_stream_meta(url: &str) -> StreamMeta {
    let mut meta = StreamMeta::default();
    if let Some(caps) = RES_PATTERN.captures(url) {
        meta.resolution = Some(format!("{}x{}", &caps[1], &caps[2]));
        meta.frame_rate = Some(caps[3].to_string());
    }
    if let Some(caps) = TIER_PATTERN.captures(url) {
        meta.format = Some(caps[1].to_uppercase());
    }
    meta
}

/// Picks the highest-scoring URL from candidates for the same asset.
///
/// Used when a page scan surfaces several renditions of one clip; only
/// the best is submitted to the store.
#[must_use]
pub fn pick_best<'a, I>(urls: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    urls.into_iter().max_by_key(|u| score(u))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== score Tests ====================

    #[test]
    fn test_score_explicit_resolution_uses_longest_edge() {
        assert_eq!(score("https://cdn.example.com/files/1920_1080_25fps.mp4"), 1920);
        assert_eq!(score("https://cdn.example.com/files/1080_1920_30fps.mp4"), 1920);
    }

    #[test]
    fn test_score_quality_tiers() {
        assert_eq!(score("https://cdn.example.com/clip-uhd_main.mp4"), 2560);
        assert_eq!(score("https://cdn.example.com/clip-hd_main.mp4"), 1080);
        assert_eq!(score("https://cdn.example.com/clip-sd_main.mp4"), 360);
    }

    #[test]
    fn test_score_adaptive_manifest_presumed_high() {
        assert_eq!(score("https://cdn.example.com/master.m3u8"), 2000);
        assert_eq!(score("https://cdn.example.com/master.m3u8?token=abc"), 2000);
    }

    #[test]
    fn test_score_unknown_floor_and_empty() {
        assert_eq!(score("https://cdn.example.com/clip.mp4"), 100);
        assert_eq!(score(""), 0);
    }

    #[test]
    fn test_score_explicit_resolution_beats_tier_token() {
        // Both markers present: the explicit pattern wins
        assert_eq!(score("https://cdn.example.com/clip-hd_1280_720_25fps.mp4"), 1280);
    }

    // ==================== resolve Tests ====================

    #[test]
    fn test_resolve_set_new_when_no_existing() {
        assert_eq!(
            resolve(None, "https://cdn.example.com/a.m3u8"),
            StreamDecision::SetNew
        );
        assert_eq!(
            resolve(Some(""), "https://cdn.example.com/a.m3u8"),
            StreamDecision::SetNew
        );
    }

    #[test]
    fn test_resolve_same_url() {
        let url = "https://cdn.example.com/a.m3u8";
        assert_eq!(resolve(Some(url), url), StreamDecision::Same);
    }

    #[test]
    fn test_resolve_upgrade_on_strictly_higher_score() {
        let sd = "https://cdn.example.com/files/1280_720_25fps.mp4";
        let hd = "https://cdn.example.com/files/1920_1080_25fps.mp4";
        assert_eq!(resolve(Some(sd), hd), StreamDecision::Upgraded);
    }

    #[test]
    fn test_resolve_keeps_on_lower_or_equal_score() {
        let hd = "https://cdn.example.com/files/1920_1080_25fps.mp4";
        let sd = "https://cdn.example.com/files/1280_720_25fps.mp4";
        assert_eq!(resolve(Some(hd), sd), StreamDecision::Kept);

        let other_hd = "https://cdn.example.com/files/1080_1920_30fps.mp4";
        assert_eq!(resolve(Some(hd), other_hd), StreamDecision::Kept);
    }

    // ==================== derive_stream_meta Tests ====================

    #[test]
    fn test_derive_stream_meta_full() {
        let meta = derive_stream_meta("https://cdn.example.com/files/3840_2160_30fps-uhd_x.mp4");
        assert_eq!(meta.resolution.as_deref(), Some("3840x2160"));
        assert_eq!(meta.frame_rate.as_deref(), Some("30"));
        assert_eq!(meta.format.as_deref(), Some("UHD"));
    }

    #[test]
    fn test_derive_stream_meta_absent_markers() {
        let meta = derive_stream_meta("https://cdn.example.com/master.m3u8");
        assert_eq!(meta, StreamMeta::default());
    }

    // ==================== pick_best Tests ====================

    #[test]
    fn test_pick_best_prefers_highest_resolution() {
        let urls = [
            "https://cdn.example.com/files/640_360_25fps.mp4",
            "https://cdn.example.com/files/3840_2160_25fps.mp4",
            "https://cdn.example.com/files/1920_1080_25fps.mp4",
        ];
        assert_eq!(
            pick_best(urls.iter().copied()),
            Some("https://cdn.example.com/files/3840_2160_25fps.mp4")
        );
    }

    #[test]
    fn test_pick_best_empty_is_none() {
        assert_eq!(pick_best(std::iter::empty()), None);
    }
}
