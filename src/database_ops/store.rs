use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::fmt;
use tracing::{instrument, warn};

use crate::util::db::Db;

pub type GameId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Disabled,
    Missing,
    Ambiguous,
    Error,
    Ok,
}

impl ResolutionStatus {
    pub const ALL: [ResolutionStatus; 5] = [
        ResolutionStatus::Disabled,
        ResolutionStatus::Missing,
        ResolutionStatus::Ambiguous,
        ResolutionStatus::Error,
        ResolutionStatus::Ok,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStatus::Disabled => "disabled",
            ResolutionStatus::Missing => "missing",
            ResolutionStatus::Ambiguous => "ambiguous",
            ResolutionStatus::Error => "error",
            ResolutionStatus::Ok => "ok",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(raw))
    }

    /// Statuses the backfill re-runs regardless of art.
    pub fn needs_backfill(self) -> bool {
        !matches!(self, ResolutionStatus::Ok)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of a game row the resolver reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub id: GameId,
    pub name: String,
    pub catalog_id: Option<i64>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub image_source: Option<String>,
    /// `None` until the first resolution run.
    pub resolution_status: Option<ResolutionStatus>,
    pub status_updated_at: Option<DateTime<Utc>>,
}

impl GameRecord {
    pub fn new(id: GameId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            catalog_id: None,
            image_url: None,
            thumbnail_url: None,
            image_source: None,
            resolution_status: None,
            status_updated_at: None,
        }
    }

    /// Backfill selection predicate.
    pub fn needs_backfill(&self) -> bool {
        self.image_url.is_none()
            || self
                .resolution_status
                .map_or(true, ResolutionStatus::needs_backfill)
    }
}

/// What happens to the catalog/art columns on a resolution write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogFields {
    /// Leave catalog id and art untouched.
    Keep,
    /// Null out catalog id, art and image source.
    Clear,
    /// Catalog id set; art and image source cleared.
    Matched { catalog_id: i64 },
    Resolved {
        catalog_id: i64,
        image_url: String,
        thumbnail_url: Option<String>,
        image_source: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionUpdate {
    pub status: ResolutionStatus,
    pub fields: CatalogFields,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn get_record(&self, id: GameId) -> Result<Option<GameRecord>>;

    /// Apply one resolution atomically. Errors if the record does not exist.
    async fn write_resolution(&self, id: GameId, update: &ResolutionUpdate) -> Result<()>;

    /// Records needing (re)resolution, ordered by name.
    async fn select_backfill(&self, limit: Option<u32>) -> Result<Vec<GameRecord>>;
}

const SELECT_COLUMNS: &str = "id, name, catalog_id, image_url, thumbnail_url, image_source, \
     resolution_status, status_updated_at";

/// `GameStore` over the `games` table.
#[derive(Clone)]
pub struct PgGameStore {
    db: Db,
}

impl PgGameStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn record_from_row(row: &PgRow) -> Result<GameRecord> {
        let raw_status: Option<String> = row.try_get("resolution_status")?;
        let resolution_status = match raw_status.as_deref() {
            Some(raw) => {
                let parsed = ResolutionStatus::parse(raw);
                if parsed.is_none() {
                    warn!(status = raw, "unknown resolution_status in games row");
                }
                parsed
            }
            None => None,
        };
        Ok(GameRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            catalog_id: row.try_get("catalog_id")?,
            image_url: row.try_get("image_url")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            image_source: row.try_get("image_source")?,
            resolution_status,
            status_updated_at: row.try_get("status_updated_at")?,
        })
    }
}

#[async_trait]
impl GameStore for PgGameStore {
    #[instrument(skip(self))]
    async fn get_record(&self, id: GameId) -> Result<Option<GameRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM games WHERE id = $1");
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .with_context(|| format!("loading game {id}"))?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn write_resolution(&self, id: GameId, update: &ResolutionUpdate) -> Result<()> {
        let status = update.status.as_str();
        let query = match &update.fields {
            CatalogFields::Keep => sqlx::query(
                "UPDATE games SET resolution_status = $2, status_updated_at = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(status)
            .bind(update.updated_at),
            CatalogFields::Clear => sqlx::query(
                "UPDATE games SET resolution_status = $2, status_updated_at = $3, \
                 catalog_id = NULL, image_url = NULL, thumbnail_url = NULL, image_source = NULL \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(status)
            .bind(update.updated_at),
            CatalogFields::Matched { catalog_id } => sqlx::query(
                "UPDATE games SET resolution_status = $2, status_updated_at = $3, \
                 catalog_id = $4, image_url = NULL, thumbnail_url = NULL, image_source = NULL \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(status)
            .bind(update.updated_at)
            .bind(*catalog_id),
            CatalogFields::Resolved {
                catalog_id,
                image_url,
                thumbnail_url,
                image_source,
            } => sqlx::query(
                "UPDATE games SET resolution_status = $2, status_updated_at = $3, \
                 catalog_id = $4, image_url = $5, thumbnail_url = $6, image_source = $7 \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(status)
            .bind(update.updated_at)
            .bind(*catalog_id)
            .bind(image_url.as_str())
            .bind(thumbnail_url.as_deref())
            .bind(image_source.as_str()),
        };
        let result = query
            .persistent(false)
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("writing resolution for game {id}"))?;
        if result.rows_affected() == 0 {
            bail!("game {id} not found");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn select_backfill(&self, limit: Option<u32>) -> Result<Vec<GameRecord>> {
        // LIMIT NULL is unbounded in Postgres.
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM games \
             WHERE resolution_status IS NULL \
                OR resolution_status IN ('disabled', 'missing', 'ambiguous', 'error') \
                OR image_url IS NULL \
             ORDER BY name ASC, id ASC \
             LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(limit.map(i64::from))
            .fetch_all(&self.db.pool)
            .await
            .context("selecting backfill candidates")?;
        rows.iter().map(Self::record_from_row).collect()
    }
}
