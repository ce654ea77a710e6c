//! Output filename construction from a user template.
//!
//! Tokens: `{title}`, `{asset_id}`, `{creator}`, `{collection}`,
//! `{resolution}`. Path separators inside the template create
//! subdirectories; every component is sanitized, and the asset id is
//! always appended when absent so two assets with the same title can
//! never collide.

use std::sync::LazyLock;

use regex::Regex;

use crate::store::Asset;
use crate::util::compile_static_regex;

/// Characters invalid in filenames across platforms.
static INVALID_CHARS: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r#"[<>:"/\\|?*]"#));

/// Runs of whitespace collapsed to a single underscore.
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s+"));

/// Maximum characters kept from the title component.
const TITLE_MAX: usize = 60;

/// Maximum characters kept from creator/collection components.
const FIELD_MAX: usize = 40;

/// Builds a relative output path (with extension) for an asset.
///
/// An unusable template (unknown token, empty expansion) falls back to
/// `{title}_{asset_id}`.
#[must_use]
pub fn apply_template(template: &str, asset: &Asset, ext: &str) -> String {
    let title = sanitize_component(&asset.title, TITLE_MAX);
    let title = if title.is_empty() {
        format!("clip_{}", fallback_id(&asset.asset_id))
    } else {
        title
    };
    let creator = non_empty_or(&sanitize_component(&asset.creator, FIELD_MAX), "unknown");
    let collection = non_empty_or(&sanitize_component(&asset.collection, FIELD_MAX), "unknown");

    let mut result = template.to_string();
    let expansions = [
        ("{title}", title.as_str()),
        ("{asset_id}", asset.asset_id.as_str()),
        ("{creator}", creator.as_str()),
        ("{collection}", collection.as_str()),
        ("{resolution}", asset.resolution.as_str()),
    ];
    for (token, value) in expansions {
        result = result.replace(token, value);
    }

    // Unknown tokens or an empty expansion invalidate the template
    if result.contains('{') || result.trim().is_empty() {
        result = format!("{title}_{}", asset.asset_id);
    }

    // Collision-proof: the asset id is always part of the name
    if !asset.asset_id.is_empty() && !result.contains(asset.asset_id.as_str()) {
        result = format!("{result}_{}", asset.asset_id);
    }

    // Sanitize each path component separately, keeping subdirectories
    let components: Vec<String> = result
        .split('/')
        .map(|part| {
            let clean = INVALID_CHARS.replace_all(part, "");
            let clean = clean.trim().trim_end_matches(['_', '.']);
            let clean = WHITESPACE.replace_all(clean, "_").into_owned();
            non_empty_or(&clean, "clip")
        })
        .collect();

    format!("{}{ext}", components.join("/"))
}

fn sanitize_component(value: &str, max: usize) -> String {
    let clean = INVALID_CHARS.replace_all(value, "");
    let clean: String = clean.chars().take(max).collect();
    clean.trim().trim_end_matches(['_', '.']).to_string()
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn fallback_id(asset_id: &str) -> &str {
    if asset_id.is_empty() { "unknown" } else { asset_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(title: &str, id: &str) -> Asset {
        Asset {
            asset_id: id.to_string(),
            title: title.to_string(),
            creator: "Jordan Vega".to_string(),
            collection: "Coastal".to_string(),
            resolution: "1920x1080".to_string(),
            ..Asset::default()
        }
    }

    #[test]
    fn test_simple_title_template_appends_id() {
        let name = apply_template("{title}", &asset("Aerial coastline", "4411"), ".mp4");
        assert_eq!(name, "Aerial_coastline_4411.mp4");
    }

    #[test]
    fn test_template_with_subdirectories() {
        let name = apply_template(
            "{creator}/{collection}/{title}",
            &asset("Aerial coastline", "4411"),
            ".mp4",
        );
        assert_eq!(name, "Jordan_Vega/Coastal/Aerial_coastline_4411.mp4");
    }

    #[test]
    fn test_invalid_characters_removed() {
        let name = apply_template("{title}", &asset(r#"Wave<s>: "big" / slow?"#, "7"), ".mp4");
        assert!(!name.contains('<'));
        assert!(!name.contains(':'));
        assert!(!name.contains('?'));
        assert!(name.ends_with("_7.mp4"));
    }

    #[test]
    fn test_unknown_token_falls_back() {
        let name = apply_template("{bogus}", &asset("Aerial coastline", "4411"), ".mp4");
        assert_eq!(name, "Aerial_coastline_4411.mp4");
    }

    #[test]
    fn test_empty_title_uses_id_placeholder() {
        let name = apply_template("{title}", &asset("", "4411"), ".mp4");
        assert_eq!(name, "clip_4411.mp4");
    }

    #[test]
    fn test_id_already_in_template_not_duplicated() {
        let name = apply_template("{asset_id}_{title}", &asset("Waves", "4411"), ".mp4");
        assert_eq!(name, "4411_Waves.mp4");
    }

    #[test]
    fn test_long_title_truncated() {
        let long = "a".repeat(200);
        let name = apply_template("{title}", &asset(&long, "9"), ".mp4");
        // 60 title chars + "_9" + ".mp4"
        assert!(name.len() <= 60 + 2 + 4);
    }

    #[test]
    fn test_resolution_token() {
        let name = apply_template("{title}_{resolution}", &asset("Waves", "1"), ".mp4");
        assert_eq!(name, "Waves_1920x1080_1.mp4");
    }
}
