//! Broadcast media repository

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;
use wb_common::BroadcastMedia;

use crate::error::{Result, StoreError};
use crate::{from_millis, from_millis_opt, to_millis};

const TABLE: &str = "broadcast_media";

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS broadcast_media (
    id TEXT PRIMARY KEY,
    broadcast_id TEXT NOT NULL,
    media_type TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_broadcast_media_broadcast ON broadcast_media(broadcast_id);
"#;

const COLUMNS: &str = "id, broadcast_id, media_type, url, created_at, updated_at, deleted_at";

pub struct SqliteBroadcastMediaRepository {
    pool: SqlitePool,
}

impl SqliteBroadcastMediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> Result<BroadcastMedia> {
        let media_type: String = row.get("media_type");
        Ok(BroadcastMedia {
            id: row.get("id"),
            broadcast_id: row.get("broadcast_id"),
            media_type: media_type
                .parse()
                .map_err(|e: wb_common::TemplateError| StoreError::corrupt(TABLE, e.to_string()))?,
            url: row.get("url"),
            created_at: from_millis(TABLE, "created_at", row.get("created_at"))?,
            updated_at: from_millis(TABLE, "updated_at", row.get("updated_at"))?,
            deleted_at: from_millis_opt(TABLE, "deleted_at", row.get("deleted_at"))?,
        })
    }

    pub async fn insert(&self, media: &BroadcastMedia) -> Result<()> {
        let query = format!("INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?)", TABLE, COLUMNS);
        sqlx::query(&query)
            .bind(&media.id)
            .bind(&media.broadcast_id)
            .bind(media.media_type.as_str())
            .bind(&media.url)
            .bind(to_millis(&media.created_at))
            .bind(to_millis(&media.updated_at))
            .bind(media.deleted_at.as_ref().map(to_millis))
            .execute(&self.pool)
            .await?;

        info!(
            media_id = %media.id,
            broadcast_id = %media.broadcast_id,
            media_type = %media.media_type,
            "Broadcast media attached"
        );
        Ok(())
    }

    /// Live media for a broadcast, oldest first
    pub async fn find_by_broadcast_id(&self, broadcast_id: &str) -> Result<Vec<BroadcastMedia>> {
        let query = format!(
            "SELECT {} FROM {} WHERE broadcast_id = ? AND deleted_at IS NULL \
             ORDER BY created_at ASC",
            COLUMNS, TABLE
        );
        let rows = sqlx::query(&query)
            .bind(broadcast_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_row).collect()
    }

    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE broadcast_media SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("BroadcastMedia", id));
        }
        info!(media_id = id, "Broadcast media soft-deleted");
        Ok(())
    }
}
