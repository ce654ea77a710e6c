//! JSON sidecar file generation for downloaded assets.
//!
//! Writes a machine-readable metadata file (`.json`) next to each
//! downloaded clip so archives stay self-describing when moved off the
//! machine.
//!
//! # Module structure note
//!
//! This module is intentionally a single file (`mod.rs`-only); the
//! feature scope is small enough to not warrant sub-files.

use std::fs;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::store::Asset;

/// Errors produced by sidecar generation.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// I/O error writing the sidecar file to disk.
    #[error("I/O error writing sidecar: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error (shouldn't occur for well-formed structs).
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialized shape of one sidecar document.
#[derive(Debug, Serialize)]
struct SidecarDocument<'a> {
    asset_id: &'a str,
    title: &'a str,
    creator: &'a str,
    collection: &'a str,
    tags: &'a str,
    resolution: &'a str,
    duration: &'a str,
    frame_rate: &'a str,
    camera: &'a str,
    formats: &'a str,
    stream_url: &'a str,
    source_url: &'a str,
    source_site: &'a str,
    local_path: String,
}

/// Generates a JSON sidecar next to the downloaded file for `asset`.
///
/// Returns `None` (with a `debug!` log) if the sidecar already exists on
/// disk - generation is idempotent by design. Returns
/// `Some(sidecar_path)` on success.
///
/// # Errors
///
/// Returns [`SidecarError`] on I/O or serialization failure.
#[instrument(skip(asset), fields(asset_id = %asset.asset_id, media = %media_path.display()))]
pub fn write_sidecar(asset: &Asset, media_path: &Path) -> Result<Option<PathBuf>, SidecarError> {
    let sidecar_path = derive_sidecar_path(media_path);

    let document = SidecarDocument {
        asset_id: &asset.asset_id,
        title: &asset.title,
        creator: &asset.creator,
        collection: &asset.collection,
        tags: &asset.tags,
        resolution: &asset.resolution,
        duration: &asset.duration,
        frame_rate: &asset.frame_rate,
        camera: &asset.camera,
        formats: &asset.formats,
        stream_url: &asset.stream_url,
        source_url: &asset.source_url,
        source_site: &asset.source_site,
        local_path: media_path.to_string_lossy().into_owned(),
    };

    let file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&sidecar_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %sidecar_path.display(), "sidecar exists, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    serde_json::to_writer_pretty(BufWriter::new(file), &document)?;
    debug!(path = %sidecar_path.display(), "sidecar written");
    Ok(Some(sidecar_path))
}

/// Derives the sidecar path by swapping the media extension for `.json`.
fn derive_sidecar_path(media_path: &Path) -> PathBuf {
    media_path.with_extension("json")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_asset() -> Asset {
        Asset {
            asset_id: "4411".to_string(),
            title: "Aerial coastline".to_string(),
            creator: "Jordan Vega".to_string(),
            stream_url: "https://cdn.example.com/master.m3u8".to_string(),
            source_site: "artlist".to_string(),
            ..Asset::default()
        }
    }

    #[test]
    fn test_write_sidecar_creates_json() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("clip_4411.mp4");
        fs::write(&media, b"fake video").unwrap();

        let path = write_sidecar(&sample_asset(), &media).unwrap().unwrap();
        assert_eq!(path, dir.path().join("clip_4411.json"));

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["asset_id"], "4411");
        assert_eq!(value["title"], "Aerial coastline");
        assert_eq!(value["local_path"], media.to_string_lossy().as_ref());
    }

    #[test]
    fn test_write_sidecar_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("clip.mp4");
        fs::write(&media, b"fake video").unwrap();

        assert!(write_sidecar(&sample_asset(), &media).unwrap().is_some());
        // Second call leaves the existing file untouched
        assert!(write_sidecar(&sample_asset(), &media).unwrap().is_none());
    }

    #[test]
    fn test_derive_sidecar_path() {
        assert_eq!(
            derive_sidecar_path(Path::new("/archive/a/clip.mp4")),
            PathBuf::from("/archive/a/clip.json")
        );
    }
}
