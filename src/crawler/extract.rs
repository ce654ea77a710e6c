//! Metadata and stream-candidate extraction from rendered pages.
//!
//! The metadata chain runs in fixed fallback order: JSON-LD structured
//! data, universal meta tags, per-profile text patterns, then generic
//! title heuristics. An extraction miss is never fatal - a field that
//! cannot be found stays empty and may be filled by a later visit or a
//! harvest hit.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::profile::SiteProfile;
use crate::store::NewAsset;
use crate::util::compile_static_regex;

/// `<script type="application/ld+json">` blocks.
static JSONLD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#,
    )
});

/// OpenGraph/Twitter meta tags, either attribute order.
static META_TAG: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<meta\s+[^>]*(?:property|name)\s*=\s*["']((?:og|twitter):[\w:]+)["'][^>]*content\s*=\s*["']([^"']+)["']"#,
    )
});

/// Meta tags with content before property.
static META_TAG_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<meta\s+[^>]*content\s*=\s*["']([^"']+)["'][^>]*(?:property|name)\s*=\s*["']((?:og|twitter):[\w:]+)["']"#,
    )
});

/// First `<h1>` text.
static H1_TEXT: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<h1[^>]*>\s*([^<]{2,120}?)\s*</h1>"));

/// URL-encoded partner links embedding full video URLs
/// (`file-url=https%3A%2F%2F...mp4`).
static ENCODED_PARTNER_LINK: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"file-url=(https?%3A%2F%2F[^&"'<>\s]+\.mp4[^&"'<>\s]*)"#));

/// Collects outbound links from the rendered page.
pub const LINKS_JS: &str = r"
    [...document.querySelectorAll('a[href]')]
        .map(a => a.href).filter(h => h && h.startsWith('http'))
";

/// Collects `src`/`data-src` attributes of video and source elements.
pub const VIDEO_SRC_JS: &str = r"
    [...document.querySelectorAll('video[src], source[src], video source[src]')]
        .map(el => el.src || el.getAttribute('src') || el.getAttribute('data-src') || '')
        .filter(s => s && s.startsWith('http'))
";

/// Collects catalog cards: `<video>` elements paired with their nearest
/// item link.
pub const CATALOG_CARDS_JS: &str = r"
    (() => {
        const out = [];
        document.querySelectorAll('video[src], video source[src]').forEach(el => {
            const src = el.src || el.getAttribute('src') || '';
            if (!src || !src.startsWith('http')) return;
            const link = el.closest('a[href]');
            out.push({ src, href: link ? link.href : '' });
        });
        return out;
    })()
";

/// Simulates player-initialization interaction so lazy HLS players
/// request their manifests: hover/focus events, forced muted play, and a
/// scroll into view for IntersectionObserver-gated loaders.
pub const TRIGGER_PLAYERS_JS: &str = r#"
    (() => {
        document.querySelectorAll(
            'video, [class*="clip"], [class*="video"], [class*="preview"], [class*="player"]'
        ).forEach(el => {
            ['mouseenter','mouseover','pointermove','focus'].forEach(evt =>
                el.dispatchEvent(new MouseEvent(evt, {bubbles: true, cancelable: true}))
            );
        });
        document.querySelectorAll('video').forEach(v => {
            try {
                v.muted = true;
                v.preload = 'auto';
                if (v.readyState === 0) v.load();
                v.play().catch(() => {});
            } catch (e) {}
        });
        const first = document.querySelector('video');
        if (first) first.scrollIntoView({block: 'center', behavior: 'instant'});
    })()
"#;

/// Init script capturing video URLs that pass through XHR/fetch or
/// appear on late-added DOM nodes. Read back with
/// [`COLLECT_INTERCEPTED_JS`].
pub const VIDEO_INTERCEPT_INIT_JS: &str = r"
    (function() {
        var VIDEO_EXTS = /\.(m3u8|mp4|webm|mpd|m3u|mov)(\?|$)/i;
        window.__capturedStreamUrls__ = window.__capturedStreamUrls__ || [];
        var push = function(url) {
            if (typeof url === 'string' && VIDEO_EXTS.test(url)) {
                window.__capturedStreamUrls__.push(url);
            }
        };
        var _open = XMLHttpRequest.prototype.open;
        XMLHttpRequest.prototype.open = function(method, url) {
            push(url);
            return _open.apply(this, arguments);
        };
        var _fetch = window.fetch;
        window.fetch = function(input) {
            push(typeof input === 'string' ? input : (input && input.url) || '');
            return _fetch.apply(this, arguments);
        };
        var mo = new MutationObserver(function(muts) {
            muts.forEach(function(m) {
                m.addedNodes.forEach(function(n) {
                    if (!n.querySelectorAll) return;
                    n.querySelectorAll('video[src], source[src], video source[src]').forEach(function(el) {
                        var s = el.src || el.getAttribute('src') || '';
                        if (s && s.startsWith('http')) window.__capturedStreamUrls__.push(s);
                    });
                });
            });
        });
        mo.observe(document.documentElement, {childList: true, subtree: true});
    })();
";

/// Reads back URLs captured by [`VIDEO_INTERCEPT_INIT_JS`].
pub const COLLECT_INTERCEPTED_JS: &str = "window.__capturedStreamUrls__ || []";

/// Reads the visible body text prefix used for challenge checks and
/// text-pattern extraction.
pub const BODY_TEXT_JS: &str =
    "(document.body && document.body.innerText || '').substring(0, 20000)";

/// Extracts metadata from a rendered item page.
///
/// Runs the profile's fallback chain over the page HTML, visible text
/// and title. Missing fields stay empty.
#[must_use]
pub fn extract_metadata(
    profile: &SiteProfile,
    html: &str,
    body_text: &str,
    page_title: &str,
) -> NewAsset {
    let mut record = NewAsset::default();
    record.source_site = profile.name.clone();

    // 1. JSON-LD structured data
    if profile.extraction.jsonld {
        merge(&mut record, &extract_jsonld(html));
    }

    // 2. Universal meta tags
    if profile.extraction.meta_tags {
        merge(&mut record, &extract_meta_tags(html));
    }

    // 3. Per-profile text patterns over visible text
    merge(&mut record, &extract_text_patterns(profile, body_text));

    // 4. Generic title heuristics
    if record.title.is_empty() {
        if let Some(caps) = H1_TEXT.captures(html) {
            record.title = caps[1].trim().to_string();
        } else if !page_title.is_empty() {
            // Strip the site suffix from "Title | Site" patterns
            record.title = page_title
                .split(['|', '-'])
                .next()
                .unwrap_or(page_title)
                .trim()
                .to_string();
        }
    }

    record
}

/// Extracts fields from JSON-LD `VideoObject` blocks.
fn extract_jsonld(html: &str) -> NewAsset {
    let mut record = NewAsset::default();
    for caps in JSONLD_BLOCK.captures_iter(html) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(caps[1].trim()) else {
            continue;
        };
        // Both bare objects and @graph arrays appear in the wild
        let candidates: Vec<&serde_json::Value> = match &value {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => other
                .get("@graph")
                .and_then(|g| g.as_array())
                .map_or_else(|| vec![other], |graph| graph.iter().collect()),
        };
        for node in candidates {
            if node.get("@type").and_then(|t| t.as_str()) != Some("VideoObject") {
                continue;
            }
            set_if_empty(&mut record.title, str_field(node, "name"));
            set_if_empty(&mut record.thumbnail_url, str_field(node, "thumbnailUrl"));
            set_if_empty(&mut record.stream_url, str_field(node, "contentUrl"));
            set_if_empty(&mut record.duration, str_field(node, "duration"));
            if let Some(author) = node.get("author").or_else(|| node.get("creator")) {
                let name = author
                    .as_str()
                    .map(ToString::to_string)
                    .or_else(|| str_field(author, "name"));
                set_if_empty(&mut record.creator, name);
            }
            if let Some(keywords) = node.get("keywords").and_then(|k| k.as_str()) {
                set_if_empty(&mut record.tags, Some(keywords.to_string()));
            }
        }
    }
    record
}

/// Extracts fields from OpenGraph/Twitter meta tags.
fn extract_meta_tags(html: &str) -> NewAsset {
    let mut tags: HashMap<String, String> = HashMap::new();
    for caps in META_TAG.captures_iter(html) {
        tags.entry(caps[1].to_lowercase()).or_insert_with(|| caps[2].to_string());
    }
    for caps in META_TAG_REVERSED.captures_iter(html) {
        tags.entry(caps[2].to_lowercase()).or_insert_with(|| caps[1].to_string());
    }

    let mut record = NewAsset::default();
    record.title = tags
        .get("og:title")
        .or_else(|| tags.get("twitter:title"))
        .cloned()
        .unwrap_or_default();
    record.thumbnail_url = tags
        .get("og:image")
        .or_else(|| tags.get("twitter:image"))
        .cloned()
        .unwrap_or_default();
    record.stream_url = tags
        .get("og:video")
        .or_else(|| tags.get("og:video:url"))
        .or_else(|| tags.get("og:video:secure_url"))
        .cloned()
        .unwrap_or_default();
    record
}

/// Applies the profile's per-field regex patterns to visible body text.
fn extract_text_patterns(profile: &SiteProfile, body_text: &str) -> NewAsset {
    let mut record = NewAsset::default();
    for (field, pattern) in &profile.extraction.text_patterns {
        let Ok(re) = Regex::new(pattern) else {
            debug!(field, "invalid profile text pattern");
            continue;
        };
        let Some(value) = re
            .captures(body_text)
            .and_then(|c| c.get(1))
            .map(|m| normalize_whitespace(m.as_str()))
        else {
            continue;
        };
        match field.as_str() {
            "asset_id" => set_if_empty(&mut record.asset_id, Some(value)),
            "title" => set_if_empty(&mut record.title, Some(value)),
            "creator" => set_if_empty(&mut record.creator, Some(value)),
            "collection" => set_if_empty(&mut record.collection, Some(value)),
            "resolution" => {
                let compact = value.replace(' ', "").replace('\u{00d7}', "x");
                set_if_empty(&mut record.resolution, Some(compact));
            }
            "duration" => set_if_empty(&mut record.duration, Some(value)),
            "frame_rate" => set_if_empty(&mut record.frame_rate, Some(value)),
            "camera" => set_if_empty(&mut record.camera, Some(value)),
            "formats" => set_if_empty(&mut record.formats, Some(value)),
            "tags" => set_if_empty(&mut record.tags, Some(to_tag_list(&value))),
            other => debug!(field = other, "unknown profile metadata field"),
        }
    }
    record
}

/// Scans rendered page HTML for stream candidates: raw regex hits plus
/// URL-encoded partner links.
#[must_use]
pub fn scan_html_for_streams(html: &str, stream_re: &Regex) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in stream_re.find_iter(html) {
        push_unique(&mut found, clean_candidate(m.as_str()));
    }
    for caps in ENCODED_PARTNER_LINK.captures_iter(html) {
        let decoded = urlencoding::decode(&caps[1])
            .map(|s| s.into_owned())
            .unwrap_or_default();
        if stream_re.is_match(&decoded) {
            push_unique(&mut found, clean_candidate(&decoded));
        }
    }
    found
}

/// Groups stream candidates by the asset id embedded in each URL.
/// Candidates without a recognizable id land under the empty key.
#[must_use]
pub fn group_by_asset_id(
    profile: &SiteProfile,
    urls: &[String],
) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for url in urls {
        let id = profile.asset_id_of(url).unwrap_or_default();
        grouped.entry(id).or_default().push(url.clone());
    }
    grouped
}

/// Trims quote/backslash debris regex capture tends to pick up.
fn clean_candidate(url: &str) -> String {
    url.trim().trim_end_matches(['"', '\'', '\\']).to_string()
}

fn push_unique(urls: &mut Vec<String>, url: String) {
    if !url.is_empty() && !urls.contains(&url) {
        urls.push(url);
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn set_if_empty(slot: &mut String, value: Option<String>) {
    if slot.is_empty()
        && let Some(value) = value
        && !value.is_empty()
    {
        *slot = value;
    }
}

/// Merges `from` into `into`, filling only empty fields.
fn merge(into: &mut NewAsset, from: &NewAsset) {
    set_if_empty(&mut into.asset_id, non_empty(&from.asset_id));
    set_if_empty(&mut into.title, non_empty(&from.title));
    set_if_empty(&mut into.creator, non_empty(&from.creator));
    set_if_empty(&mut into.collection, non_empty(&from.collection));
    set_if_empty(&mut into.resolution, non_empty(&from.resolution));
    set_if_empty(&mut into.duration, non_empty(&from.duration));
    set_if_empty(&mut into.frame_rate, non_empty(&from.frame_rate));
    set_if_empty(&mut into.camera, non_empty(&from.camera));
    set_if_empty(&mut into.formats, non_empty(&from.formats));
    set_if_empty(&mut into.tags, non_empty(&from.tags));
    set_if_empty(&mut into.stream_url, non_empty(&from.stream_url));
    set_if_empty(&mut into.thumbnail_url, non_empty(&from.thumbnail_url));
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses a multi-line tag block into a comma-separated list.
fn to_tag_list(block: &str) -> String {
    block
        .split(['\n', ','])
        .map(str::trim)
        .filter(|t| !t.is_empty() && t.len() < 40)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::profile::ProfileRegistry;

    fn artlist() -> SiteProfile {
        ProfileRegistry::with_builtins().get("artlist").unwrap().clone()
    }

    // ==================== JSON-LD Tests ====================

    #[test]
    fn test_jsonld_video_object() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {"@type": "VideoObject", "name": "Aerial coastline",
             "thumbnailUrl": "https://cdn.example.com/thumb.jpg",
             "contentUrl": "https://cdn.example.com/master.m3u8",
             "author": {"name": "Jordan Vega"},
             "keywords": "aerial, ocean"}
            </script></head></html>"#;
        let record = extract_jsonld(html);
        assert_eq!(record.title, "Aerial coastline");
        assert_eq!(record.creator, "Jordan Vega");
        assert_eq!(record.thumbnail_url, "https://cdn.example.com/thumb.jpg");
        assert_eq!(record.stream_url, "https://cdn.example.com/master.m3u8");
        assert_eq!(record.tags, "aerial, ocean");
    }

    #[test]
    fn test_jsonld_graph_wrapper_and_non_video_ignored() {
        let html = r#"<script type="application/ld+json">
            {"@graph": [
                {"@type": "WebPage", "name": "not this"},
                {"@type": "VideoObject", "name": "Graph clip"}
            ]}
        </script>"#;
        let record = extract_jsonld(html);
        assert_eq!(record.title, "Graph clip");
    }

    #[test]
    fn test_jsonld_malformed_is_ignored() {
        let html = r#"<script type="application/ld+json">{not json}</script>"#;
        assert!(extract_jsonld(html).title.is_empty());
    }

    // ==================== Meta tag Tests ====================

    #[test]
    fn test_meta_tags_both_attribute_orders() {
        let html = r#"
            <meta property="og:title" content="Meta clip" />
            <meta content="https://cdn.example.com/og.jpg" property="og:image" />
            <meta name="og:video" content="https://cdn.example.com/og.mp4" />
        "#;
        let record = extract_meta_tags(html);
        assert_eq!(record.title, "Meta clip");
        assert_eq!(record.thumbnail_url, "https://cdn.example.com/og.jpg");
        assert_eq!(record.stream_url, "https://cdn.example.com/og.mp4");
    }

    // ==================== Text pattern Tests ====================

    #[test]
    fn test_text_patterns_artlist_fields() {
        let body = "Clip ID 288449\nResolution 3840 x 2160\nLength 00:12\nFrame Rate 25\n\
                    Clip by\nJordan Vega\nPart of\nCoastal Pack";
        let record = extract_text_patterns(&artlist(), body);
        assert_eq!(record.asset_id, "288449");
        assert_eq!(record.resolution, "3840x2160");
        assert_eq!(record.duration, "00:12");
        assert_eq!(record.frame_rate, "25");
        assert_eq!(record.creator, "Jordan Vega");
        assert_eq!(record.collection, "Coastal Pack");
    }

    #[test]
    fn test_extraction_miss_leaves_fields_empty() {
        let record = extract_metadata(&artlist(), "<html></html>", "", "");
        assert!(record.title.is_empty());
        assert!(record.creator.is_empty());
    }

    // ==================== Fallback chain Tests ====================

    #[test]
    fn test_jsonld_wins_over_meta_tags() {
        let html = r#"
            <script type="application/ld+json">{"@type":"VideoObject","name":"Structured"}</script>
            <meta property="og:title" content="Meta" />
        "#;
        let record = extract_metadata(&artlist(), html, "", "ignored");
        assert_eq!(record.title, "Structured");
    }

    #[test]
    fn test_title_falls_back_to_h1_then_page_title() {
        let record = extract_metadata(&artlist(), "<h1>Heading title</h1>", "", "Page | Site");
        assert_eq!(record.title, "Heading title");

        let record = extract_metadata(&artlist(), "<p>no heading</p>", "", "Page title | Artlist");
        assert_eq!(record.title, "Page title");
    }

    // ==================== Page scan Tests ====================

    #[test]
    fn test_scan_html_finds_raw_and_encoded_streams() {
        let profile = artlist();
        let re = SiteProfile {
            video_types: vec!["m3u8".to_string(), "mp4".to_string()],
            ..profile
        }
        .stream_url_regex();
        let html = r#"
            <video src="https://cdn.example.com/video-files/1/1280_720_25fps.mp4"></video>
            <script>var m = "https://cdn.example.com/master.m3u8?tok=1\'";</script>
            <a href="https://partner.example.com/design?file-url=https%3A%2F%2Fcdn.example.com%2Fvideo-files%2F1%2F3840_2160_25fps.mp4&x=1">hd</a>
        "#;
        let found = scan_html_for_streams(html, &re);
        assert!(found.iter().any(|u| u.contains("1280_720")));
        assert!(found.iter().any(|u| u.contains("master.m3u8")));
        assert!(found.iter().any(|u| u.contains("3840_2160")), "{found:?}");
        // Quote debris trimmed
        assert!(found.iter().all(|u| !u.ends_with('\'')));
    }

    #[test]
    fn test_scan_html_dedups() {
        let re = artlist().stream_url_regex();
        let html = r#"
            <video src="https://cdn.example.com/a.m3u8"></video>
            <source src="https://cdn.example.com/a.m3u8">
        "#;
        assert_eq!(scan_html_for_streams(html, &re).len(), 1);
    }

    #[test]
    fn test_group_by_asset_id() {
        let registry = ProfileRegistry::with_builtins();
        let pexels = registry.get("pexels").unwrap();
        let urls = vec![
            "https://videos.pexels.com/video-files/11/1280_720_25fps.mp4".to_string(),
            "https://videos.pexels.com/video-files/11/3840_2160_25fps.mp4".to_string(),
            "https://videos.pexels.com/video-files/22/640_360_25fps.mp4".to_string(),
            "https://cdn.example.com/unattributed.m3u8".to_string(),
        ];
        let grouped = group_by_asset_id(pexels, &urls);
        assert_eq!(grouped.get("11").map(Vec::len), Some(2));
        assert_eq!(grouped.get("22").map(Vec::len), Some(1));
        assert_eq!(grouped.get("").map(Vec::len), Some(1));
    }
}
