//! Typed records for the asset table, work queue and visit ledger.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Download lifecycle state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// No download attempted yet (empty column).
    None,
    /// Waiting in the pipeline queue.
    Queued,
    /// A worker currently owns the job.
    Downloading,
    /// Remux completed and the local file exists.
    Done,
    /// Permanent failure or retries exhausted.
    Error,
}

impl DownloadStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::None),
            "queued" => Ok(Self::Queued),
            "downloading" => Ok(Self::Downloading),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// Terminal state of one page visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitStatus {
    /// Page was fetched and processed.
    Done,
    /// Page load or processing failed; not auto-retried within the run.
    Failed,
}

impl VisitStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One URL pending classification/extraction in the crawl queue.
#[derive(Debug, Clone, FromRow)]
pub struct WorkItem {
    /// The normalized page URL (unique key).
    pub url: String,
    /// Crawl depth at which the URL was discovered.
    pub depth: i64,
    /// Higher priority items are dequeued first.
    pub priority: i64,
    /// Name of the site profile that discovered the URL.
    pub profile: String,
    /// When the item entered the queue.
    pub added_at: String,
}

/// One row of the page-visit ledger.
#[derive(Debug, Clone, FromRow)]
pub struct PageVisit {
    /// The visited page URL (unique key).
    pub url: String,
    /// Terminal status string (`done`/`failed`), parsed via `status()`.
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Depth at which the page was processed.
    pub depth: i64,
    /// Profile active when the page was processed.
    pub profile: String,
    /// When the visit was recorded.
    pub visited_at: String,
}

impl PageVisit {
    /// Returns the parsed visit status.
    ///
    /// Falls back to `Failed` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> VisitStatus {
        if self.status_str == "done" {
            VisitStatus::Done
        } else {
            VisitStatus::Failed
        }
    }
}

/// One discoverable video asset with metadata and an eventual stream URL.
///
/// Columns are stored as empty strings rather than NULLs; presence checks
/// are `is_empty()` checks on named fields.
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct Asset {
    /// Row id (FTS content rowid).
    pub id: i64,
    /// Site-assigned asset identifier (unique key).
    pub asset_id: String,
    /// Page URL the asset was discovered on.
    pub source_url: String,
    /// Asset title.
    pub title: String,
    /// Credited creator/author.
    pub creator: String,
    /// Collection or pack name on the source site.
    pub collection: String,
    /// `"1920x1080"`-style resolution string.
    pub resolution: String,
    /// Duration as the site spells it (`MM:SS` or `HH:MM:SS`).
    pub duration: String,
    /// Frame rate in frames per second.
    pub frame_rate: String,
    /// Camera model, when the site exposes it.
    pub camera: String,
    /// Quality tier / container formats label.
    pub formats: String,
    /// Comma-separated site tags.
    pub tags: String,
    /// Best stream URL resolved so far (monotonic upgrade only).
    pub stream_url: String,
    /// Preview thumbnail URL.
    pub thumbnail_url: String,
    /// Path of the downloaded file, once a download succeeded.
    pub local_path: String,
    /// Download lifecycle string, parsed via `download_status()`.
    #[sqlx(rename = "download_status")]
    pub download_status_str: String,
    /// Path of the locally extracted thumbnail.
    pub thumb_path: String,
    /// User star rating (0-5).
    pub user_rating: i64,
    /// 1 when the user favorited the asset.
    pub favorited: i64,
    /// Free-form user notes.
    pub notes: String,
    /// Comma-separated user tags (indexed alongside site tags).
    pub user_tags: String,
    /// Profile name of the site the asset came from.
    pub source_site: String,
    /// When the asset was first discovered.
    pub found_at: String,
}

impl Asset {
    /// Returns the parsed download status.
    ///
    /// Falls back to `None` if the status string is invalid.
    #[must_use]
    pub fn download_status(&self) -> DownloadStatus {
        self.download_status_str.parse().unwrap_or(DownloadStatus::None)
    }

    /// True when the asset has a stream URL but no completed download.
    #[must_use]
    pub fn needs_download(&self) -> bool {
        !self.stream_url.is_empty()
            && (self.local_path.is_empty() || self.download_status() != DownloadStatus::Done)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Asset {{ id: {}, title: {:?}, stream: {} }}",
            self.asset_id,
            self.title,
            if self.stream_url.is_empty() { "no" } else { "yes" }
        )
    }
}

/// Field set submitted on discovery; every field is optional except the id.
///
/// `upsert` inserts these values on first sight; `update_metadata` merges
/// them fill-if-empty (except the upgradeable subset).
#[derive(Debug, Clone, Default)]
pub struct NewAsset {
    /// Site-assigned asset identifier.
    pub asset_id: String,
    /// Page URL the asset was discovered on.
    pub source_url: String,
    /// Asset title.
    pub title: String,
    /// Credited creator/author.
    pub creator: String,
    /// Collection or pack name.
    pub collection: String,
    /// Resolution string.
    pub resolution: String,
    /// Duration string.
    pub duration: String,
    /// Frame rate string.
    pub frame_rate: String,
    /// Camera model.
    pub camera: String,
    /// Quality tier label.
    pub formats: String,
    /// Comma-separated site tags.
    pub tags: String,
    /// Candidate stream URL.
    pub stream_url: String,
    /// Preview thumbnail URL.
    pub thumbnail_url: String,
    /// Profile name of the source site.
    pub source_site: String,
}

impl NewAsset {
    /// Creates an otherwise-empty record for the given asset id.
    #[must_use]
    pub fn with_id(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            ..Self::default()
        }
    }

    /// True when the record carries nothing worth persisting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.asset_id.is_empty() && self.title.is_empty() && self.stream_url.is_empty()
    }
}
