//! Persistent store: crawl work queue, page-visit ledger and asset table.
//!
//! This is the single source of truth shared by the crawl orchestrator,
//! the download pipeline and the catalog harvest engine. All mutations
//! are serialized by one coarse async lock held across read-modify-write
//! sequences; reads go straight to the pool and may overlap writes, which
//! the WAL journal tolerates.
//!
//! # Overview
//!
//! The store consists of:
//! - [`Store`] - Main interface for all persistence operations
//! - [`Asset`] / [`NewAsset`] - Typed asset records
//! - [`WorkItem`] / [`PageVisit`] - Crawl queue and ledger rows
//! - [`StoreError`] - Operation error types
//!
//! # Example
//!
//! ```ignore
//! use clipvault_core::store::Store;
//! use clipvault_core::Database;
//!
//! let db = Database::new_in_memory().await?;
//! let store = Store::new(db);
//!
//! store.enqueue("https://example.com/stock-footage/", 0, 100, "artlist").await?;
//! if let Some(item) = store.dequeue(Some("artlist")).await? {
//!     // ... fetch and extract the page ...
//!     store.mark_visited(&item.url, item.depth, "artlist", VisitStatus::Done).await?;
//! }
//! ```

mod asset;
mod error;
mod search;

pub use asset::{Asset, DownloadStatus, NewAsset, PageVisit, VisitStatus, WorkItem};
pub use error::{StoreDbErrorKind, StoreError};
pub use search::{AssetQuery, DurationRange, TextMode};

use std::sync::Arc;

use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::resolve::{self, StreamDecision};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Snapshot counters surfaced to the UI after every processed page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Total asset rows.
    pub assets_found: i64,
    /// Asset rows with a resolved stream URL.
    pub streams_found: i64,
    /// Pages recorded `done` in the visit ledger.
    pub pages_done: i64,
    /// Work items still queued.
    pub queued: i64,
    /// Pages recorded `failed` in the visit ledger.
    pub failed: i64,
}

/// Persistent store over the shared SQLite database.
///
/// Cheap to clone; clones share the pool and the coarse write lock.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Creates a new store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Work queue ====================

    /// Inserts a work item if the URL is not already queued.
    ///
    /// Idempotent: enqueueing the same URL twice leaves exactly one row.
    /// Returns `true` if a new row was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self), fields(url = %url, profile = %profile))]
    pub async fn enqueue(&self, url: &str, depth: i64, priority: i64, profile: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r"INSERT OR IGNORE INTO crawl_queue (url, depth, priority, profile)
              VALUES (?, ?, ?, ?)",
        )
        .bind(url)
        .bind(depth)
        .bind(priority)
        .bind(profile)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically removes and returns the best eligible work item.
    ///
    /// Ordering: highest priority first, then earliest insertion, then URL
    /// (deterministic tie-break). Optionally scoped to one profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn dequeue(&self, profile: Option<&str>) -> Result<Option<WorkItem>> {
        let _guard = self.write_lock.lock().await;
        // Atomic DELETE..RETURNING ensures no race between select and remove
        let item = if let Some(profile) = profile {
            sqlx::query_as::<_, WorkItem>(
                r"DELETE FROM crawl_queue
                  WHERE url = (
                      SELECT url FROM crawl_queue
                      WHERE profile = ?
                      ORDER BY priority DESC, added_at ASC, url ASC
                      LIMIT 1
                  )
                  RETURNING *",
            )
            .bind(profile)
            .fetch_optional(self.db.pool())
            .await?
        } else {
            sqlx::query_as::<_, WorkItem>(
                r"DELETE FROM crawl_queue
                  WHERE url = (
                      SELECT url FROM crawl_queue
                      ORDER BY priority DESC, added_at ASC, url ASC
                      LIMIT 1
                  )
                  RETURNING *",
            )
            .fetch_optional(self.db.pool())
            .await?
        };

        Ok(item)
    }

    /// Returns the number of queued items, optionally for one profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn queue_size(&self, profile: Option<&str>) -> Result<i64> {
        let count: (i64,) = if let Some(profile) = profile {
            sqlx::query_as("SELECT COUNT(*) FROM crawl_queue WHERE profile = ?")
                .bind(profile)
                .fetch_one(self.db.pool())
                .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM crawl_queue")
                .fetch_one(self.db.pool())
                .await?
        };
        Ok(count.0)
    }

    /// True when the URL is recorded `done` in the visit ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn is_visited(&self, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM page_visits WHERE url = ? AND status = 'done'")
            .bind(url)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Fetches one visit-ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_visit(&self, url: &str) -> Result<Option<PageVisit>> {
        let visit = sqlx::query_as::<_, PageVisit>("SELECT * FROM page_visits WHERE url = ?")
            .bind(url)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(visit)
    }

    /// Records a page visit, idempotently overwriting any earlier record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    #[instrument(skip(self), fields(url = %url, status = %status))]
    pub async fn mark_visited(
        &self,
        url: &str,
        depth: i64,
        profile: &str,
        status: VisitStatus,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r"INSERT OR REPLACE INTO page_visits (url, status, depth, profile, visited_at)
              VALUES (?, ?, ?, ?, datetime('now'))",
        )
        .bind(url)
        .bind(status.as_str())
        .bind(depth)
        .bind(profile)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Removes a URL from the visit ledger.
    ///
    /// Used when seeding start URLs so a fresh run always re-fetches them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn forget_visit(&self, url: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM page_visits WHERE url = ?")
            .bind(url)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    // ==================== Assets ====================

    /// Inserts an asset on first sight. Returns `true` if a new row was
    /// created; an existing `asset_id` leaves the row untouched (use
    /// [`Store::update_metadata`] / [`Store::upgrade_stream`] to enrich it).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self, record), fields(asset_id = %record.asset_id))]
    pub async fn upsert_asset(&self, record: &NewAsset) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r"INSERT OR IGNORE INTO assets
              (asset_id, source_url, title, creator, collection, resolution,
               duration, frame_rate, camera, formats, tags, stream_url,
               thumbnail_url, source_site)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.asset_id)
        .bind(&record.source_url)
        .bind(&record.title)
        .bind(&record.creator)
        .bind(&record.collection)
        .bind(&record.resolution)
        .bind(&record.duration)
        .bind(&record.frame_rate)
        .bind(&record.camera)
        .bind(&record.formats)
        .bind(&record.tags)
        .bind(&record.stream_url)
        .bind(&record.thumbnail_url)
        .bind(&record.source_site)
        .execute(self.db.pool())
        .await?;

        let is_new = result.rows_affected() > 0;
        if is_new {
            let rowid = result.last_insert_rowid();
            self.index_asset_row(rowid, &record.asset_id).await;
        }
        Ok(is_new)
    }

    /// Merges metadata into an existing asset.
    ///
    /// Most fields fill only if currently empty; the upgradeable subset
    /// (resolution, formats, frame rate) overwrites whenever the new value
    /// is non-empty. The stream URL is never touched here - that path runs
    /// through [`Store::upgrade_stream`] so quality stays monotonic.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, record), fields(asset_id = %asset_id))]
    pub async fn update_metadata(&self, asset_id: &str, record: &NewAsset) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        sqlx::query(
            r"UPDATE assets SET
                title         = CASE WHEN title = ''         AND ?1 != '' THEN ?1 ELSE title END,
                creator       = CASE WHEN creator = ''       AND ?2 != '' THEN ?2 ELSE creator END,
                collection    = CASE WHEN collection = ''    AND ?3 != '' THEN ?3 ELSE collection END,
                duration      = CASE WHEN duration = ''      AND ?4 != '' THEN ?4 ELSE duration END,
                camera        = CASE WHEN camera = ''        AND ?5 != '' THEN ?5 ELSE camera END,
                tags          = CASE WHEN tags = ''          AND ?6 != '' THEN ?6 ELSE tags END,
                thumbnail_url = CASE WHEN thumbnail_url = '' AND ?7 != '' THEN ?7 ELSE thumbnail_url END,
                source_url    = CASE WHEN source_url = ''    AND ?8 != '' THEN ?8 ELSE source_url END,
                source_site   = CASE WHEN source_site = ''   AND ?9 != '' THEN ?9 ELSE source_site END,
                resolution    = CASE WHEN ?10 != '' THEN ?10 ELSE resolution END,
                formats       = CASE WHEN ?11 != '' THEN ?11 ELSE formats END,
                frame_rate    = CASE WHEN ?12 != '' THEN ?12 ELSE frame_rate END
              WHERE asset_id = ?13",
        )
        .bind(&record.title)
        .bind(&record.creator)
        .bind(&record.collection)
        .bind(&record.duration)
        .bind(&record.camera)
        .bind(&record.tags)
        .bind(&record.thumbnail_url)
        .bind(&record.source_url)
        .bind(&record.source_site)
        .bind(&record.resolution)
        .bind(&record.formats)
        .bind(&record.frame_rate)
        .bind(asset_id)
        .execute(self.db.pool())
        .await?;

        self.reindex_asset(asset_id).await;
        Ok(())
    }

    /// Submits a candidate stream URL for an asset.
    ///
    /// Delegates the keep/replace decision to [`crate::resolve::resolve`];
    /// on an upgrade the resolution/frame-rate/format columns are
    /// re-derived from the candidate filename. The stored URL's score is
    /// monotonically non-decreasing over any call sequence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn upgrade_stream(&self, asset_id: &str, candidate: &str) -> Result<StreamDecision> {
        let _guard = self.write_lock.lock().await;

        let row = sqlx::query("SELECT stream_url FROM assets WHERE asset_id = ?")
            .bind(asset_id)
            .fetch_optional(self.db.pool())
            .await?;
        let Some(row) = row else {
            return Ok(StreamDecision::NotFound);
        };
        let existing: String = row.get("stream_url");

        let decision = resolve::resolve(Some(existing.as_str()), candidate);
        match decision {
            StreamDecision::SetNew => {
                sqlx::query("UPDATE assets SET stream_url = ? WHERE asset_id = ?")
                    .bind(candidate)
                    .bind(asset_id)
                    .execute(self.db.pool())
                    .await?;
            }
            StreamDecision::Upgraded => {
                sqlx::query("UPDATE assets SET stream_url = ? WHERE asset_id = ?")
                    .bind(candidate)
                    .bind(asset_id)
                    .execute(self.db.pool())
                    .await?;

                // Higher-quality source also refreshes the derived columns
                let meta = resolve::derive_stream_meta(candidate);
                if let (Some(resolution), Some(frame_rate)) = (&meta.resolution, &meta.frame_rate) {
                    sqlx::query(
                        "UPDATE assets SET resolution = ?, frame_rate = ? WHERE asset_id = ?",
                    )
                    .bind(resolution)
                    .bind(frame_rate)
                    .bind(asset_id)
                    .execute(self.db.pool())
                    .await?;
                }
                if let Some(format) = &meta.format {
                    sqlx::query("UPDATE assets SET formats = ? WHERE asset_id = ?")
                        .bind(format)
                        .bind(asset_id)
                        .execute(self.db.pool())
                        .await?;
                }
                self.reindex_asset(asset_id).await;
            }
            StreamDecision::Same | StreamDecision::Kept | StreamDecision::NotFound => {}
        }

        debug!(asset_id, ?decision, "stream candidate resolved");
        Ok(decision)
    }

    /// Fetches one asset by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_asset(&self, asset_id: &str) -> Result<Option<Asset>> {
        let asset = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE asset_id = ?")
            .bind(asset_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(asset)
    }

    /// Returns assets with a resolved stream URL, optionally restricted to
    /// those not yet downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn assets_with_streams(&self, only_undownloaded: bool, limit: i64) -> Result<Vec<Asset>> {
        let sql = if only_undownloaded {
            r"SELECT * FROM assets
              WHERE stream_url != '' AND (download_status != 'done' OR local_path = '')
              ORDER BY found_at DESC LIMIT ?"
        } else {
            "SELECT * FROM assets WHERE stream_url != '' ORDER BY found_at DESC LIMIT ?"
        };
        let assets = sqlx::query_as::<_, Asset>(sql)
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;
        Ok(assets)
    }

    // ==================== Download + curation updates ====================

    /// Sets the download lifecycle status of an asset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    #[instrument(skip(self), fields(asset_id = %asset_id, status = %status))]
    pub async fn set_download_status(&self, asset_id: &str, status: DownloadStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE assets SET download_status = ? WHERE asset_id = ?")
            .bind(status.as_str())
            .bind(asset_id)
            .execute(self.db.pool())
            .await?;
        check_affected(asset_id, result.rows_affected())
    }

    /// Records a completed download's local path and status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    #[instrument(skip(self, local_path), fields(asset_id = %asset_id))]
    pub async fn update_local_path(
        &self,
        asset_id: &str,
        local_path: &std::path::Path,
        status: DownloadStatus,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE assets SET local_path = ?, download_status = ? WHERE asset_id = ?",
        )
        .bind(local_path.to_string_lossy().as_ref())
        .bind(status.as_str())
        .bind(asset_id)
        .execute(self.db.pool())
        .await?;
        check_affected(asset_id, result.rows_affected())
    }

    /// Records an extracted thumbnail path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    pub async fn update_thumb_path(&self, asset_id: &str, thumb_path: &std::path::Path) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE assets SET thumb_path = ? WHERE asset_id = ?")
            .bind(thumb_path.to_string_lossy().as_ref())
            .bind(asset_id)
            .execute(self.db.pool())
            .await?;
        check_affected(asset_id, result.rows_affected())
    }

    /// Sets the user star rating (clamped 0-5).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    pub async fn set_rating(&self, asset_id: &str, rating: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE assets SET user_rating = ? WHERE asset_id = ?")
            .bind(rating.clamp(0, 5))
            .bind(asset_id)
            .execute(self.db.pool())
            .await?;
        check_affected(asset_id, result.rows_affected())
    }

    /// Sets free-form user notes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    pub async fn set_notes(&self, asset_id: &str, notes: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE assets SET notes = ? WHERE asset_id = ?")
            .bind(notes)
            .bind(asset_id)
            .execute(self.db.pool())
            .await?;
        check_affected(asset_id, result.rows_affected())
    }

    /// Sets user tags and re-indexes the row for search.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    pub async fn set_user_tags(&self, asset_id: &str, tags: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE assets SET user_tags = ? WHERE asset_id = ?")
            .bind(tags)
            .bind(asset_id)
            .execute(self.db.pool())
            .await?;
        check_affected(asset_id, result.rows_affected())?;
        self.reindex_asset(asset_id).await;
        Ok(())
    }

    /// Flips the favorited flag and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AssetNotFound`] if no row matched.
    pub async fn toggle_favorite(&self, asset_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let row = sqlx::query(
            "UPDATE assets SET favorited = 1 - favorited WHERE asset_id = ? RETURNING favorited",
        )
        .bind(asset_id)
        .fetch_optional(self.db.pool())
        .await?;
        match row {
            Some(row) => Ok(row.get::<i64, _>("favorited") == 1),
            None => Err(StoreError::AssetNotFound(asset_id.to_string())),
        }
    }

    /// Returns distinct non-empty values of a filterable column.
    ///
    /// Unknown column names yield an empty list rather than an error - the
    /// caller is typically populating a dropdown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn distinct_values(&self, column: &str) -> Result<Vec<String>> {
        if !search::VALID_FILTER_COLUMNS.contains(&column) {
            warn!(column, "rejected invalid filter column");
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT {column} AS v FROM assets WHERE {column} != '' ORDER BY {column}"
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("v")).collect())
    }

    // ==================== Stats + maintenance ====================

    /// Returns snapshot counters for the UI stats bar.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<StoreStats> {
        let assets_found: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assets")
            .fetch_one(self.db.pool())
            .await?;
        let streams_found: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM assets WHERE stream_url != ''")
                .fetch_one(self.db.pool())
                .await?;
        let pages_done: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM page_visits WHERE status = 'done'")
                .fetch_one(self.db.pool())
                .await?;
        let failed: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM page_visits WHERE status = 'failed'")
                .fetch_one(self.db.pool())
                .await?;
        let queued: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crawl_queue")
            .fetch_one(self.db.pool())
            .await?;

        Ok(StoreStats {
            assets_found: assets_found.0,
            streams_found: streams_found.0,
            pages_done: pages_done.0,
            queued: queued.0,
            failed: failed.0,
        })
    }

    /// Deletes every asset, visit and work item. The only delete path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a delete fails.
    #[instrument(skip(self))]
    pub async fn clear_archive(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for sql in [
            "DELETE FROM assets",
            "DELETE FROM assets_fts",
            "DELETE FROM page_visits",
            "DELETE FROM crawl_queue",
        ] {
            sqlx::query(sql).execute(self.db.pool()).await?;
        }
        Ok(())
    }

    // ==================== FTS maintenance (internal) ====================

    /// Inserts the FTS row for a freshly inserted asset. Best-effort: the
    /// index is derived state, so a failure triggers a rebuild attempt and
    /// is otherwise only logged.
    async fn index_asset_row(&self, rowid: i64, asset_id: &str) {
        let result = sqlx::query(
            r"INSERT INTO assets_fts
              (rowid, title, creator, collection, tags, resolution, camera, duration)
              SELECT id, title, creator, collection,
                     tags || ' ' || user_tags, resolution, camera, duration
              FROM assets WHERE id = ?",
        )
        .bind(rowid)
        .execute(self.db.pool())
        .await;

        if let Err(error) = result {
            warn!(asset_id, %error, "free-text index write failed; rebuilding");
            if let Err(error) = self.rebuild_index_locked().await {
                warn!(%error, "free-text index rebuild failed");
            }
        }
    }

    /// Replaces the FTS row for an asset after a metadata change.
    async fn reindex_asset(&self, asset_id: &str) {
        let result = async {
            let row = sqlx::query("SELECT id FROM assets WHERE asset_id = ?")
                .bind(asset_id)
                .fetch_optional(self.db.pool())
                .await?;
            let Some(row) = row else {
                return Ok::<_, sqlx::Error>(());
            };
            let rowid: i64 = row.get("id");
            sqlx::query("DELETE FROM assets_fts WHERE rowid = ?")
                .bind(rowid)
                .execute(self.db.pool())
                .await?;
            sqlx::query(
                r"INSERT INTO assets_fts
                  (rowid, title, creator, collection, tags, resolution, camera, duration)
                  SELECT id, title, creator, collection,
                         tags || ' ' || user_tags, resolution, camera, duration
                  FROM assets WHERE id = ?",
            )
            .bind(rowid)
            .execute(self.db.pool())
            .await?;
            Ok(())
        }
        .await;

        if let Err(error) = result {
            warn!(asset_id, %error, "free-text reindex failed; rebuilding");
            if let Err(error) = self.rebuild_index_locked().await {
                warn!(%error, "free-text index rebuild failed");
            }
        }
    }

    /// Rebuilds the free-text index from the asset table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IndexRebuild`] if the rebuild itself fails;
    /// search then degrades to unindexed scans.
    #[instrument(skip(self))]
    pub async fn rebuild_index(&self) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        self.rebuild_index_locked().await
    }

    /// Rebuild body shared by the public entry point and the self-healing
    /// paths that already hold the write lock.
    pub(crate) async fn rebuild_index_locked(&self) -> Result<i64> {
        // Dropping and recreating clears a corrupted shadow table that a
        // plain DELETE cannot read.
        let rebuild = async {
            sqlx::query("DROP TABLE IF EXISTS assets_fts")
                .execute(self.db.pool())
                .await?;
            sqlx::query(
                r"CREATE VIRTUAL TABLE assets_fts USING fts5(
                      title, creator, collection, tags, resolution, camera, duration,
                      content='assets', content_rowid='id',
                      tokenize='porter unicode61')",
            )
            .execute(self.db.pool())
            .await?;
            sqlx::query(
                r"INSERT INTO assets_fts
                  (rowid, title, creator, collection, tags, resolution, camera, duration)
                  SELECT id, title, creator, collection,
                         tags || ' ' || user_tags, resolution, camera, duration
                  FROM assets",
            )
            .execute(self.db.pool())
            .await?;
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM assets_fts")
                .fetch_one(self.db.pool())
                .await?;
            Ok::<_, sqlx::Error>(count.0)
        }
        .await;

        match rebuild {
            Ok(count) => {
                debug!(count, "free-text index rebuilt");
                Ok(count)
            }
            Err(error) => Err(StoreError::IndexRebuild(error)),
        }
    }
}

/// Returns `Ok(())` if at least one row was affected; otherwise
/// [`StoreError::AssetNotFound`].
fn check_affected(asset_id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::AssetNotFound(asset_id.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let db = Database::new_in_memory().await.unwrap();
        Store::new(db)
    }

    fn sample_asset(asset_id: &str) -> NewAsset {
        NewAsset {
            asset_id: asset_id.to_string(),
            source_url: format!("https://example.com/stock-footage/clip/{asset_id}"),
            title: "Aerial coastline".to_string(),
            creator: "Jordan Vega".to_string(),
            tags: "aerial,ocean".to_string(),
            source_site: "artlist".to_string(),
            ..NewAsset::default()
        }
    }

    // ==================== Queue Tests ====================

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let store = test_store().await;
        assert!(store.enqueue("https://example.com/a", 0, 10, "artlist").await.unwrap());
        assert!(!store.enqueue("https://example.com/a", 0, 10, "artlist").await.unwrap());
        assert_eq!(store.queue_size(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_orders_by_priority_then_insertion() {
        let store = test_store().await;
        store.enqueue("https://example.com/low", 1, 5, "artlist").await.unwrap();
        store.enqueue("https://example.com/high-a", 1, 10, "artlist").await.unwrap();
        store.enqueue("https://example.com/high-b", 1, 10, "artlist").await.unwrap();

        let first = store.dequeue(None).await.unwrap().unwrap();
        assert_eq!(first.url, "https://example.com/high-a");
        let second = store.dequeue(None).await.unwrap().unwrap();
        assert_eq!(second.url, "https://example.com/high-b");
        let third = store.dequeue(None).await.unwrap().unwrap();
        assert_eq!(third.url, "https://example.com/low");
        assert!(store.dequeue(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_scoped_to_profile() {
        let store = test_store().await;
        store.enqueue("https://a.example.com/1", 0, 10, "artlist").await.unwrap();
        store.enqueue("https://b.example.com/1", 0, 99, "pexels").await.unwrap();

        let item = store.dequeue(Some("artlist")).await.unwrap().unwrap();
        assert_eq!(item.profile, "artlist");
        assert_eq!(store.queue_size(Some("pexels")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_removes_item() {
        let store = test_store().await;
        store.enqueue("https://example.com/a", 2, 10, "artlist").await.unwrap();
        let item = store.dequeue(None).await.unwrap().unwrap();
        assert_eq!(item.depth, 2);
        assert_eq!(store.queue_size(None).await.unwrap(), 0);
    }

    // ==================== Visit ledger Tests ====================

    #[tokio::test]
    async fn test_mark_visited_and_is_visited() {
        let store = test_store().await;
        let url = "https://example.com/stock-footage/clip/123";
        assert!(!store.is_visited(url).await.unwrap());

        store.mark_visited(url, 1, "artlist", VisitStatus::Done).await.unwrap();
        assert!(store.is_visited(url).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_visit_is_not_visited() {
        let store = test_store().await;
        let url = "https://example.com/stock-footage/clip/123";
        store.mark_visited(url, 1, "artlist", VisitStatus::Failed).await.unwrap();
        // Failed pages are eligible again on a fresh run
        assert!(!store.is_visited(url).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_visited_overwrites_idempotently() {
        let store = test_store().await;
        let url = "https://example.com/page";
        store.mark_visited(url, 1, "artlist", VisitStatus::Failed).await.unwrap();
        store.mark_visited(url, 1, "artlist", VisitStatus::Done).await.unwrap();
        assert!(store.is_visited(url).await.unwrap());

        let visit = store.get_visit(url).await.unwrap().unwrap();
        assert_eq!(visit.status(), VisitStatus::Done);
        assert_eq!(visit.depth, 1);
        assert_eq!(visit.profile, "artlist");

        store.forget_visit(url).await.unwrap();
        assert!(!store.is_visited(url).await.unwrap());
        assert!(store.get_visit(url).await.unwrap().is_none());
    }

    // ==================== Asset Tests ====================

    #[tokio::test]
    async fn test_upsert_asset_first_sight_and_duplicate() {
        let store = test_store().await;
        assert!(store.upsert_asset(&sample_asset("100")).await.unwrap());
        assert!(!store.upsert_asset(&sample_asset("100")).await.unwrap());

        let asset = store.get_asset("100").await.unwrap().unwrap();
        assert_eq!(asset.title, "Aerial coastline");
    }

    #[tokio::test]
    async fn test_update_metadata_fill_if_empty() {
        let store = test_store().await;
        store.upsert_asset(&sample_asset("100")).await.unwrap();

        let update = NewAsset {
            asset_id: "100".to_string(),
            title: "Different title".to_string(),
            collection: "Coastal pack".to_string(),
            ..NewAsset::default()
        };
        store.update_metadata("100", &update).await.unwrap();

        let asset = store.get_asset("100").await.unwrap().unwrap();
        // title was already set: kept. collection was empty: filled.
        assert_eq!(asset.title, "Aerial coastline");
        assert_eq!(asset.collection, "Coastal pack");
    }

    #[tokio::test]
    async fn test_update_metadata_upgradeable_subset_overwrites() {
        let store = test_store().await;
        let mut record = sample_asset("100");
        record.resolution = "1280x720".to_string();
        record.formats = "SD".to_string();
        store.upsert_asset(&record).await.unwrap();

        let update = NewAsset {
            asset_id: "100".to_string(),
            resolution: "3840x2160".to_string(),
            formats: "UHD".to_string(),
            frame_rate: "30".to_string(),
            ..NewAsset::default()
        };
        store.update_metadata("100", &update).await.unwrap();

        let asset = store.get_asset("100").await.unwrap().unwrap();
        assert_eq!(asset.resolution, "3840x2160");
        assert_eq!(asset.formats, "UHD");
        assert_eq!(asset.frame_rate, "30");
    }

    #[tokio::test]
    async fn test_upgrade_stream_set_new_then_upgrade_then_keep() {
        let store = test_store().await;
        store.upsert_asset(&sample_asset("100")).await.unwrap();

        let sd = "https://cdn.example.com/video-files/100/1280_720_25fps.mp4";
        let hd = "https://cdn.example.com/video-files/100/1920_1080_25fps.mp4";

        assert_eq!(store.upgrade_stream("100", sd).await.unwrap(), StreamDecision::SetNew);
        assert_eq!(store.upgrade_stream("100", hd).await.unwrap(), StreamDecision::Upgraded);
        assert_eq!(store.upgrade_stream("100", sd).await.unwrap(), StreamDecision::Kept);
        assert_eq!(store.upgrade_stream("100", hd).await.unwrap(), StreamDecision::Same);

        let asset = store.get_asset("100").await.unwrap().unwrap();
        assert_eq!(asset.stream_url, hd);
        // Upgrade re-derived the quality columns from the filename
        assert_eq!(asset.resolution, "1920x1080");
        assert_eq!(asset.frame_rate, "25");
    }

    #[tokio::test]
    async fn test_upgrade_stream_unknown_asset() {
        let store = test_store().await;
        assert_eq!(
            store.upgrade_stream("nope", "https://cdn.example.com/a.m3u8").await.unwrap(),
            StreamDecision::NotFound
        );
    }

    #[tokio::test]
    async fn test_assets_with_streams_filters_downloaded() {
        let store = test_store().await;
        let mut a = sample_asset("1");
        a.stream_url = "https://cdn.example.com/1.m3u8".to_string();
        store.upsert_asset(&a).await.unwrap();
        let mut b = sample_asset("2");
        b.stream_url = "https://cdn.example.com/2.m3u8".to_string();
        store.upsert_asset(&b).await.unwrap();
        store.upsert_asset(&sample_asset("3")).await.unwrap(); // no stream

        store
            .update_local_path("2", std::path::Path::new("/archive/2.mp4"), DownloadStatus::Done)
            .await
            .unwrap();

        let all = store.assets_with_streams(false, 100).await.unwrap();
        assert_eq!(all.len(), 2);

        let pending = store.assets_with_streams(true, 100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].asset_id, "1");
    }

    // ==================== Curation Tests ====================

    #[tokio::test]
    async fn test_curation_updates() {
        let store = test_store().await;
        store.upsert_asset(&sample_asset("100")).await.unwrap();

        store.set_rating("100", 9).await.unwrap(); // clamped
        store.set_notes("100", "great establishing shot").await.unwrap();
        store.set_user_tags("100", "b-roll,intro").await.unwrap();
        assert!(store.toggle_favorite("100").await.unwrap());
        assert!(!store.toggle_favorite("100").await.unwrap());

        let asset = store.get_asset("100").await.unwrap().unwrap();
        assert_eq!(asset.user_rating, 5);
        assert_eq!(asset.notes, "great establishing shot");
        assert_eq!(asset.user_tags, "b-roll,intro");
        assert_eq!(asset.favorited, 0);
    }

    #[tokio::test]
    async fn test_curation_unknown_asset_errors() {
        let store = test_store().await;
        let err = store.set_rating("missing", 3).await.unwrap_err();
        assert!(matches!(err, StoreError::AssetNotFound(_)));
        let err = store.toggle_favorite("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn test_distinct_values_valid_and_invalid_column() {
        let store = test_store().await;
        store.upsert_asset(&sample_asset("1")).await.unwrap();
        let mut other = sample_asset("2");
        other.creator = "Sam Reyes".to_string();
        store.upsert_asset(&other).await.unwrap();

        let creators = store.distinct_values("creator").await.unwrap();
        assert_eq!(creators, vec!["Jordan Vega".to_string(), "Sam Reyes".to_string()]);

        // Never interpolates untrusted column names
        assert!(store.distinct_values("1; DROP TABLE assets").await.unwrap().is_empty());
    }

    // ==================== Stats + maintenance Tests ====================

    #[tokio::test]
    async fn test_stats_counts() {
        let store = test_store().await;
        let mut record = sample_asset("1");
        record.stream_url = "https://cdn.example.com/1.m3u8".to_string();
        store.upsert_asset(&record).await.unwrap();
        store.upsert_asset(&sample_asset("2")).await.unwrap();
        store.enqueue("https://example.com/q", 0, 0, "artlist").await.unwrap();
        store.mark_visited("https://example.com/d", 0, "artlist", VisitStatus::Done).await.unwrap();
        store.mark_visited("https://example.com/f", 0, "artlist", VisitStatus::Failed).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                assets_found: 2,
                streams_found: 1,
                pages_done: 1,
                queued: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_clear_archive_removes_everything() {
        let store = test_store().await;
        store.upsert_asset(&sample_asset("1")).await.unwrap();
        store.enqueue("https://example.com/q", 0, 0, "artlist").await.unwrap();
        store.mark_visited("https://example.com/d", 0, "artlist", VisitStatus::Done).await.unwrap();

        store.clear_archive().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, StoreStats::default());
    }

    #[tokio::test]
    async fn test_rebuild_index_counts_rows() {
        let store = test_store().await;
        store.upsert_asset(&sample_asset("1")).await.unwrap();
        store.upsert_asset(&sample_asset("2")).await.unwrap();

        let count = store.rebuild_index().await.unwrap();
        assert_eq!(count, 2);
    }
}
