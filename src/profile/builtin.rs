//! Built-in site profiles.
//!
//! These mirror the sites the crawler is tuned for out of the box; custom
//! profiles with the same JSON shape can be registered alongside them.

use std::collections::BTreeMap;

use super::{ExtractionRecipe, PaginationRecipe, SiteProfile};

/// Returns every built-in profile.
#[must_use]
pub fn builtin_profiles() -> Vec<SiteProfile> {
    vec![artlist(), pexels(), pixabay(), storyblocks(), generic()]
}

fn artlist() -> SiteProfile {
    let mut text_patterns = BTreeMap::new();
    text_patterns.insert("asset_id".to_string(), r"Clip\s+ID\s+(\d+)".to_string());
    text_patterns.insert(
        "resolution".to_string(),
        r"Resolution\s+([\d]{3,4}\s*[xX\u{00d7}]\s*[\d]{3,4})".to_string(),
    );
    text_patterns.insert("duration".to_string(), r"Length\s+([\d:]{4,8})".to_string());
    text_patterns.insert("frame_rate".to_string(), r"Frame\s+Rate\s+(\d+)".to_string());
    text_patterns.insert(
        "camera".to_string(),
        r"Camera\s+([^\n\r]{2,50}?)(?:\n|\r|Available)".to_string(),
    );
    text_patterns.insert(
        "formats".to_string(),
        r"Available\s+Formats\s+((?:(?:HD|SD|4K|2K|ProRes|MP4|MOV|RAW)\s*)+)".to_string(),
    );
    text_patterns.insert(
        "creator".to_string(),
        r"Clip by\s*\n?\s*([^\n\r]{2,50})".to_string(),
    );
    text_patterns.insert(
        "collection".to_string(),
        r"Part of\s*\n?\s*([^\n\r]{2,60})".to_string(),
    );
    text_patterns.insert(
        "tags".to_string(),
        r"Tags\s*\n((?:.+\n?){1,25}?)(?:Related|Part of|Clip by|Similar|Explore|$)".to_string(),
    );

    SiteProfile {
        name: "artlist".to_string(),
        description: "Artlist.io stock footage - M3U8 HLS streams".to_string(),
        domains: vec!["artlist.io".to_string()],
        start_url: "https://artlist.io/stock-footage/".to_string(),
        catalog_patterns: vec!["/stock-footage".to_string()],
        item_patterns: vec!["/stock-footage/".to_string()],
        exclude_patterns: vec![
            "/sfx".to_string(),
            "/stock-music".to_string(),
            "/video-templates".to_string(),
            "/song/".to_string(),
            "/sound-effects".to_string(),
            "/templates".to_string(),
            "/playlist".to_string(),
            "/browse".to_string(),
            "/editorial".to_string(),
            "/enterprise".to_string(),
            "/teams".to_string(),
            "/voice-over".to_string(),
            "/royalty-free-music".to_string(),
            "/luts".to_string(),
            "/tools".to_string(),
            "/favorites".to_string(),
            "/downloads".to_string(),
            "/spotlight".to_string(),
        ],
        item_url_regex: r"/stock-footage/.+/\d{4,}$".to_string(),
        video_types: vec!["m3u8".to_string()],
        asset_id_pattern: r"/(\d{4,})(?:[/?]|$)".to_string(),
        stream_host: String::new(),
        scroll_items: true,
        extraction: ExtractionRecipe {
            jsonld: true,
            meta_tags: true,
            text_patterns,
            custom_js: String::new(),
        },
        pagination: PaginationRecipe::default(),
    }
}

fn pexels() -> SiteProfile {
    SiteProfile {
        name: "pexels".to_string(),
        description: "Pexels.com free stock videos - direct MP4 downloads (SD/HD/UHD)".to_string(),
        domains: vec!["pexels.com".to_string()],
        start_url: "https://www.pexels.com/videos/".to_string(),
        catalog_patterns: vec![
            "/videos/".to_string(),
            "/search/videos/".to_string(),
            "/collections/".to_string(),
        ],
        item_patterns: vec!["/video/".to_string()],
        exclude_patterns: vec![
            "/download/".to_string(),
            "/license/".to_string(),
            "/photo/".to_string(),
            "/ja-jp/".to_string(),
            "/ko-kr/".to_string(),
            "/de-de/".to_string(),
            "/fr-fr/".to_string(),
            "/es-es/".to_string(),
            "/pt-br/".to_string(),
            "/zh-cn/".to_string(),
            "/ru-ru/".to_string(),
            "/it-it/".to_string(),
            "/nl-nl/".to_string(),
            "/pl-pl/".to_string(),
            "/tr-tr/".to_string(),
        ],
        item_url_regex: r"pexels\.com/video/[^/]+-\d+/?$".to_string(),
        video_types: vec!["mp4".to_string(), "webm".to_string()],
        asset_id_pattern: r"/video-files/(\d+)/".to_string(),
        stream_host: "videos.pexels.com".to_string(),
        scroll_items: true,
        extraction: ExtractionRecipe {
            jsonld: true,
            meta_tags: true,
            text_patterns: BTreeMap::new(),
            custom_js: String::new(),
        },
        pagination: PaginationRecipe {
            load_more_selector: r#"[class*="loadMore"], [class*="LoadMore"]"#.to_string(),
            load_more_clicks: 15,
        },
    }
}

fn pixabay() -> SiteProfile {
    SiteProfile {
        name: "pixabay".to_string(),
        description: "Pixabay.com free stock videos".to_string(),
        domains: vec!["pixabay.com".to_string()],
        start_url: "https://pixabay.com/videos/".to_string(),
        catalog_patterns: vec!["/videos/".to_string()],
        item_patterns: vec!["/videos/".to_string()],
        exclude_patterns: Vec::new(),
        item_url_regex: r"/videos/[^/]+-\d+/?$".to_string(),
        video_types: vec!["mp4".to_string(), "webm".to_string()],
        asset_id_pattern: r"-(\d+)/?$".to_string(),
        stream_host: String::new(),
        scroll_items: true,
        extraction: ExtractionRecipe {
            jsonld: true,
            meta_tags: true,
            text_patterns: BTreeMap::new(),
            custom_js: String::new(),
        },
        pagination: PaginationRecipe::default(),
    }
}

fn storyblocks() -> SiteProfile {
    SiteProfile {
        name: "storyblocks".to_string(),
        description: "Storyblocks.com stock video - HLS streams".to_string(),
        domains: vec!["storyblocks.com".to_string()],
        start_url: "https://www.storyblocks.com/video/".to_string(),
        catalog_patterns: vec!["/video/".to_string()],
        item_patterns: vec!["/video/stock/".to_string()],
        exclude_patterns: Vec::new(),
        item_url_regex: r"/video/stock/.+".to_string(),
        video_types: vec!["m3u8".to_string(), "mp4".to_string(), "webm".to_string()],
        asset_id_pattern: r"-(\d{4,})(?:\.|$)".to_string(),
        stream_host: String::new(),
        scroll_items: true,
        extraction: ExtractionRecipe {
            jsonld: true,
            meta_tags: true,
            text_patterns: BTreeMap::new(),
            custom_js: String::new(),
        },
        pagination: PaginationRecipe::default(),
    }
}

fn generic() -> SiteProfile {
    SiteProfile {
        name: "generic".to_string(),
        description: "Auto-detect video streams on any site (M3U8, MP4, WebM, DASH)".to_string(),
        domains: Vec::new(),
        start_url: String::new(),
        catalog_patterns: Vec::new(),
        item_patterns: Vec::new(),
        exclude_patterns: Vec::new(),
        item_url_regex: String::new(),
        video_types: vec![
            "m3u8".to_string(),
            "mp4".to_string(),
            "webm".to_string(),
            "mpd".to_string(),
            "mov".to_string(),
        ],
        asset_id_pattern: r"/(\d{4,})(?:[/?]|$)".to_string(),
        stream_host: String::new(),
        scroll_items: true,
        extraction: ExtractionRecipe {
            jsonld: true,
            meta_tags: true,
            text_patterns: BTreeMap::new(),
            custom_js: String::new(),
        },
        pagination: PaginationRecipe::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let profiles = builtin_profiles();
        let mut names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), profiles.len());
    }

    #[test]
    fn test_artlist_item_regex_matches() {
        let profile = artlist();
        assert_eq!(
            profile.classify("https://artlist.io/stock-footage/clip/ocean/288449"),
            crate::profile::PageClass::Item
        );
        assert_eq!(
            profile.classify("https://artlist.io/stock-footage/search"),
            crate::profile::PageClass::Catalog
        );
    }

    #[test]
    fn test_pexels_stream_host_is_cdn() {
        assert_eq!(pexels().stream_host, "videos.pexels.com");
    }
}
