//! Site profiles: declarative per-site crawl and extraction rules.
//!
//! A [`SiteProfile`] is configuration, not behavior - the orchestrator
//! stays profile-agnostic and asks the active profile how to classify,
//! normalize and extract. Profiles are registered by name in a
//! [`ProfileRegistry`] and never subclassed; custom profiles deserialize
//! from JSON with the same shape as the built-ins.

mod builtin;

pub use builtin::builtin_profiles;

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::util::canonical_host;

/// Path substrings excluded on every site (account/checkout/legal chrome).
const COMMON_EXCLUDES: &[&str] = &[
    "/login",
    "/signup",
    "/sign-up",
    "/sign-in",
    "/pricing",
    "/cart",
    "/checkout",
    "/account",
    "/terms",
    "/privacy",
    "/blog",
    "/help",
    "/support",
    "/about",
    "/careers",
];

/// Tracking query parameters stripped during URL normalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "ref",
    "fbclid",
    "gclid",
    "gad_source",
];

/// Page classification produced by [`SiteProfile::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// Listing/category page; yields cards and more links.
    Catalog,
    /// Individual asset page; yields metadata and stream candidates.
    Item,
    /// Anything else; treated as a catalog with no expectation of cards.
    Generic,
}

/// How metadata is pulled out of a rendered item page, in fallback order:
/// structured data, universal meta tags, per-profile text patterns, then
/// generic title heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionRecipe {
    /// Try JSON-LD structured data blocks first.
    #[serde(default = "default_true")]
    pub jsonld: bool,
    /// Fall back to OpenGraph/Twitter meta tags.
    #[serde(default = "default_true")]
    pub meta_tags: bool,
    /// Per-field regex applied to visible body text, e.g.
    /// `"creator" -> r"by\s+([A-Z][\w\s]+)"`.
    #[serde(default)]
    pub text_patterns: BTreeMap<String, String>,
    /// Extra JavaScript evaluated on item pages (player nudges etc.).
    #[serde(default)]
    pub custom_js: String,
}

fn default_true() -> bool {
    true
}

/// Catalog pagination: a load-more button and a click budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationRecipe {
    /// CSS selector of the load-more control; empty disables clicking.
    #[serde(default)]
    pub load_more_selector: String,
    /// Maximum number of load-more clicks per catalog page.
    #[serde(default)]
    pub load_more_clicks: u32,
}

/// Declarative, per-site ruleset governing URL classification and
/// metadata extraction. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Registry key and display name.
    pub name: String,
    /// Short description for UIs.
    #[serde(default)]
    pub description: String,
    /// Allowed domains (substring match on host); empty allows all.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Default seed URL for this site.
    #[serde(default)]
    pub start_url: String,
    /// URL substrings identifying listing/category pages.
    #[serde(default)]
    pub catalog_patterns: Vec<String>,
    /// URL path substrings identifying individual item pages.
    #[serde(default)]
    pub item_patterns: Vec<String>,
    /// URL substrings to skip (merged with the common excludes).
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Regex identifying item URLs; when set it overrides the
    /// pattern + numeric-segment heuristic.
    #[serde(default)]
    pub item_url_regex: String,
    /// Video container/manifest extensions this profile records.
    #[serde(default = "default_video_types")]
    pub video_types: Vec<String>,
    /// Regex capturing the numeric asset id out of an item page URL or a
    /// stream candidate URL; first capture group is the id.
    #[serde(default)]
    pub asset_id_pattern: String,
    /// Only record stream URLs whose host contains this value; empty
    /// disables the filter.
    #[serde(default)]
    pub stream_host: String,
    /// Whether item pages are scrolled for related-content links.
    #[serde(default = "default_true")]
    pub scroll_items: bool,
    /// Metadata extraction fallback chain.
    #[serde(default)]
    pub extraction: ExtractionRecipe,
    /// Catalog pagination recipe.
    #[serde(default)]
    pub pagination: PaginationRecipe,
}

fn default_video_types() -> Vec<String> {
    vec![
        "m3u8".to_string(),
        "mp4".to_string(),
        "webm".to_string(),
        "mpd".to_string(),
    ]
}

impl SiteProfile {
    /// True when the host is inside this profile's allowed domains.
    /// An empty domain list allows every host.
    #[must_use]
    pub fn is_allowed_domain(&self, host: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let host = canonical_host(host);
        self.domains.iter().any(|d| host.contains(d.as_str()))
    }

    /// Classifies a URL as catalog, item or generic.
    ///
    /// Item detection combines the optional regex with a "final path
    /// segment is numeric" heuristic on the item patterns - a deliberate
    /// precision/recall tradeoff that avoids fetching a page to find out
    /// what it is.
    #[must_use]
    pub fn classify(&self, url: &str) -> PageClass {
        if self.is_item(url) {
            PageClass::Item
        } else if self.is_catalog(url) {
            PageClass::Catalog
        } else {
            PageClass::Generic
        }
    }

    fn is_catalog(&self, url: &str) -> bool {
        !self.catalog_patterns.is_empty() && self.catalog_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    fn is_item(&self, url: &str) -> bool {
        if !self.item_url_regex.is_empty() {
            if let Ok(re) = Regex::new(&self.item_url_regex) {
                return re.is_match(url);
            }
        }
        if self.item_patterns.is_empty() {
            return false;
        }
        let path = Url::parse(url).map(|u| u.path().trim_end_matches('/').to_string());
        let Ok(path) = path else { return false };
        if !self.item_patterns.iter().any(|p| path.contains(p.as_str())) {
            return false;
        }
        // Numeric final segment marks an item page
        path.rsplit('/')
            .next()
            .is_some_and(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
    }

    /// True when the URL matches a common or profile-specific exclude.
    #[must_use]
    pub fn is_excluded(&self, url: &str) -> bool {
        COMMON_EXCLUDES.iter().any(|p| url.contains(p))
            || self.exclude_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    /// Canonicalizes a URL: strips the fragment and tracking parameters.
    /// Returns `None` for unparseable URLs or disallowed domains.
    #[must_use]
    pub fn normalize_url(&self, url: &str) -> Option<String> {
        let mut parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        if !self.is_allowed_domain(host) {
            return None;
        }
        parsed.set_fragment(None);
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            let query = kept
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            parsed.set_query(Some(&query));
        }
        Some(parsed.to_string())
    }

    /// Single regex matching any of this profile's video types.
    #[must_use]
    pub fn stream_url_regex(&self) -> Regex {
        // Extension tokens are restricted to alphanumerics so a
        // config-supplied type can never change the pattern's shape.
        let mut types: Vec<String> = self
            .video_types
            .iter()
            .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()))
            .cloned()
            .collect();
        if types.is_empty() {
            types = default_video_types();
        }
        let exts = types.join("|");
        crate::util::compile_static_regex(&format!(
            r#"(?i)https?://[^\s"'<>]+\.(?:{exts})(?:\?[^\s"'<>]*)?"#
        ))
    }

    /// Extracts the numeric asset id embedded in a URL, when the profile
    /// defines an id pattern.
    #[must_use]
    pub fn asset_id_of(&self, url: &str) -> Option<String> {
        if self.asset_id_pattern.is_empty() {
            return None;
        }
        let re = Regex::new(&self.asset_id_pattern).ok()?;
        re.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
    }

    /// True when a stream candidate passes the profile's CDN host filter.
    #[must_use]
    pub fn allows_stream_host(&self, url: &str) -> bool {
        if self.stream_host.is_empty() {
            return true;
        }
        crate::util::host_of(url).is_some_and(|h| h.contains(self.stream_host.as_str()))
    }
}

/// Name-keyed registry of site profiles.
///
/// Built per orchestrator instance - there is no process-wide mutable
/// profile state.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, SiteProfile>,
}

impl ProfileRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the built-in profiles.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for profile in builtin_profiles() {
            registry.register(profile);
        }
        registry
    }

    /// Registers a profile under its name, replacing any previous one.
    pub fn register(&mut self, profile: SiteProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// Looks up a profile by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SiteProfile> {
        self.profiles.get(name)
    }

    /// Returns all registered profile names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}
