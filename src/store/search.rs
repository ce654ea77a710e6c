//! Asset search: column filters plus FTS5 free text with self-healing.
//!
//! The free-text index is derived state. If an FTS statement fails (a
//! corrupted shadow table surfaces as an error on MATCH), the store drops
//! and rebuilds the index from the asset table and retries the query
//! once. Only if the rebuild itself fails does the caller see degraded
//! behavior: the query silently falls back to an unindexed LIKE scan.

use tracing::{instrument, warn};

use super::asset::Asset;
use super::{Result, Store};

/// Columns accepted as equality filters. Never interpolate anything else.
pub(crate) const VALID_FILTER_COLUMNS: &[&str] = &[
    "creator",
    "collection",
    "resolution",
    "frame_rate",
    "download_status",
    "camera",
    "formats",
    "source_site",
];

/// How multi-word free text is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMode {
    /// Any word may match (OR).
    #[default]
    Any,
    /// Every word must match (AND).
    All,
}

/// Inclusive duration window in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationRange {
    /// Lower bound in seconds.
    pub min_secs: f64,
    /// Upper bound in seconds.
    pub max_secs: f64,
}

/// One asset search request.
#[derive(Debug, Clone)]
pub struct AssetQuery {
    /// Free-text query; empty means no text constraint.
    pub text: String,
    /// Word combination mode for the free text.
    pub mode: TextMode,
    /// `(column, value)` equality filters; columns outside
    /// [`VALID_FILTER_COLUMNS`] are dropped with a warning.
    pub filters: Vec<(String, String)>,
    /// Only favorited assets.
    pub favorites_only: bool,
    /// Only assets with a completed download.
    pub downloaded_only: bool,
    /// Minimum user rating (0 disables).
    pub min_rating: i64,
    /// Optional duration window.
    pub duration: Option<DurationRange>,
    /// Maximum rows returned.
    pub limit: i64,
    /// Row offset for paging.
    pub offset: i64,
}

impl Default for AssetQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            mode: TextMode::Any,
            filters: Vec::new(),
            favorites_only: false,
            downloaded_only: false,
            min_rating: 0,
            duration: None,
            limit: 3000,
            offset: 0,
        }
    }
}

impl AssetQuery {
    /// Convenience constructor for a plain free-text query.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Builds the FTS MATCH expression for the configured word mode.
    fn match_expression(&self) -> String {
        let joiner = match self.mode {
            TextMode::Any => " OR ",
            TextMode::All => " AND ",
        };
        self.text
            .split_whitespace()
            .map(|w| format!("\"{}\"", w.replace('"', "")))
            .collect::<Vec<_>>()
            .join(joiner)
    }
}

/// SQL expression converting a `MM:SS` / `HH:MM:SS` duration column to
/// seconds. Rows with unparseable durations evaluate to 0.
const DURATION_SECONDS_EXPR: &str = r"(
    CASE
        WHEN LENGTH(a.duration) - LENGTH(REPLACE(a.duration, ':', '')) >= 2 THEN
            CAST(SUBSTR(a.duration, 1, INSTR(a.duration, ':') - 1) AS REAL) * 3600 +
            CAST(SUBSTR(SUBSTR(a.duration, INSTR(a.duration, ':') + 1), 1,
                 INSTR(SUBSTR(a.duration, INSTR(a.duration, ':') + 1), ':') - 1) AS REAL) * 60 +
            CAST(SUBSTR(SUBSTR(a.duration, INSTR(a.duration, ':') + 1),
                 INSTR(SUBSTR(a.duration, INSTR(a.duration, ':') + 1), ':') + 1) AS REAL)
        WHEN a.duration LIKE '%:%' THEN
            CAST(SUBSTR(a.duration, 1, INSTR(a.duration, ':') - 1) AS REAL) * 60 +
            CAST(SUBSTR(a.duration, INSTR(a.duration, ':') + 1) AS REAL)
        ELSE 0
    END
)";

impl Store {
    /// Runs an asset search.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] only for non-FTS failures;
    /// index corruption is healed or degraded transparently.
    #[instrument(skip(self, query), fields(text = %query.text))]
    pub async fn search(&self, query: &AssetQuery) -> Result<Vec<Asset>> {
        if query.text.trim().is_empty() {
            return self.search_unindexed(query, false).await;
        }

        match self.search_fts(query).await {
            Ok(assets) => Ok(assets),
            Err(error) => {
                warn!(%error, "free-text query failed; rebuilding index");
                let rebuilt = {
                    let _guard = self.write_lock.lock().await;
                    self.rebuild_index_locked().await
                };
                match rebuilt {
                    Ok(_) => Ok(self.search_fts(query).await?),
                    Err(rebuild_error) => {
                        warn!(%rebuild_error, "index rebuild failed; degrading to unindexed scan");
                        self.search_unindexed(query, true).await
                    }
                }
            }
        }
    }

    /// FTS-joined search path.
    async fn search_fts(&self, query: &AssetQuery) -> std::result::Result<Vec<Asset>, sqlx::Error> {
        let mut sql = String::from(
            r"SELECT a.* FROM assets a
              JOIN assets_fts f ON a.id = f.rowid
              WHERE assets_fts MATCH ?",
        );
        let mut binds: Vec<String> = vec![query.match_expression()];
        push_common_clauses(&mut sql, &mut binds, query);
        sql.push_str(" ORDER BY rank LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, Asset>(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q.bind(query.limit).bind(query.offset).fetch_all(self.database().pool()).await
    }

    /// Unindexed path: no text, or LIKE-degraded text scan.
    async fn search_unindexed(&self, query: &AssetQuery, like_text: bool) -> Result<Vec<Asset>> {
        let mut sql = String::from("SELECT a.* FROM assets a WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if like_text {
            let words: Vec<&str> = query.text.split_whitespace().collect();
            let joiner = match query.mode {
                TextMode::Any => " OR ",
                TextMode::All => " AND ",
            };
            if !words.is_empty() {
                let clauses: Vec<String> = words
                    .iter()
                    .map(|_| {
                        "(a.title LIKE ? OR a.creator LIKE ? OR a.collection LIKE ? \
                         OR a.tags LIKE ? OR a.user_tags LIKE ?)"
                            .to_string()
                    })
                    .collect();
                sql.push_str(&format!(" AND ({})", clauses.join(joiner)));
                for word in words {
                    let pattern = format!("%{word}%");
                    for _ in 0..5 {
                        binds.push(pattern.clone());
                    }
                }
            }
        }

        push_common_clauses(&mut sql, &mut binds, query);
        sql.push_str(" ORDER BY a.found_at DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, Asset>(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        let assets = q
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(self.database().pool())
            .await?;
        Ok(assets)
    }
}

/// Appends filter/favorite/download/rating/duration clauses shared by the
/// indexed and unindexed paths.
fn push_common_clauses(sql: &mut String, binds: &mut Vec<String>, query: &AssetQuery) {
    for (column, value) in &query.filters {
        if !VALID_FILTER_COLUMNS.contains(&column.as_str()) {
            warn!(column, "rejected invalid filter column");
            continue;
        }
        if value.is_empty() {
            continue;
        }
        sql.push_str(&format!(" AND a.{column} = ?"));
        binds.push(value.clone());
    }
    if query.favorites_only {
        sql.push_str(" AND a.favorited = 1");
    }
    if query.downloaded_only {
        sql.push_str(" AND a.download_status = 'done' AND a.local_path != ''");
    }
    if query.min_rating > 0 {
        sql.push_str(&format!(" AND a.user_rating >= {}", query.min_rating));
    }
    if let Some(range) = &query.duration {
        sql.push_str(&format!(
            " AND {DURATION_SECONDS_EXPR} BETWEEN {} AND {}",
            range.min_secs, range.max_secs
        ));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::{NewAsset, Store};
    use super::*;
    use crate::db::Database;

    async fn seeded_store() -> Store {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);

        let assets = [
            ("1", "Aerial coastline at dawn", "Jordan Vega", "aerial,ocean", "00:12"),
            ("2", "City traffic timelapse", "Sam Reyes", "city,night", "00:45"),
            ("3", "Forest river aerial", "Jordan Vega", "aerial,forest", "01:30"),
        ];
        for (id, title, creator, tags, duration) in assets {
            store
                .upsert_asset(&NewAsset {
                    asset_id: id.to_string(),
                    title: title.to_string(),
                    creator: creator.to_string(),
                    tags: tags.to_string(),
                    duration: duration.to_string(),
                    source_site: "artlist".to_string(),
                    ..NewAsset::default()
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_search_free_text_any_mode() {
        let store = seeded_store().await;
        let results = store.search(&AssetQuery::text("aerial")).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_free_text_all_mode() {
        let store = seeded_store().await;
        let query = AssetQuery {
            text: "aerial forest".to_string(),
            mode: TextMode::All,
            ..AssetQuery::default()
        };
        let results = store.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "3");
    }

    #[tokio::test]
    async fn test_search_column_filter() {
        let store = seeded_store().await;
        let query = AssetQuery {
            filters: vec![("creator".to_string(), "Sam Reyes".to_string())],
            ..AssetQuery::default()
        };
        let results = store.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "2");
    }

    #[tokio::test]
    async fn test_search_invalid_filter_column_is_dropped() {
        let store = seeded_store().await;
        let query = AssetQuery {
            filters: vec![("id; DROP TABLE assets".to_string(), "x".to_string())],
            ..AssetQuery::default()
        };
        // Invalid columns are ignored, not interpolated
        let results = store.search(&query).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_search_duration_range() {
        let store = seeded_store().await;
        let query = AssetQuery {
            duration: Some(DurationRange { min_secs: 30.0, max_secs: 60.0 }),
            ..AssetQuery::default()
        };
        let results = store.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "2");
    }

    #[tokio::test]
    async fn test_search_heals_after_index_corruption() {
        let store = seeded_store().await;

        // Simulate corruption by destroying the index table outright
        sqlx::query("DROP TABLE assets_fts")
            .execute(store.database().pool())
            .await
            .unwrap();

        // The MATCH fails, the index is rebuilt from assets, the query retried
        let results = store.search(&AssetQuery::text("aerial")).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_min_rating_and_favorites() {
        let store = seeded_store().await;
        store.set_rating("1", 5).await.unwrap();
        store.toggle_favorite("1").await.unwrap();

        let query = AssetQuery {
            favorites_only: true,
            min_rating: 4,
            ..AssetQuery::default()
        };
        let results = store.search(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_id, "1");
    }

    #[tokio::test]
    async fn test_search_limit_and_offset() {
        let store = seeded_store().await;
        let query = AssetQuery {
            limit: 2,
            ..AssetQuery::default()
        };
        assert_eq!(store.search(&query).await.unwrap().len(), 2);

        let query = AssetQuery {
            limit: 2,
            offset: 2,
            ..AssetQuery::default()
        };
        assert_eq!(store.search(&query).await.unwrap().len(), 1);
    }
}
