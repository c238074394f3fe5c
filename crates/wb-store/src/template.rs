//! Template repository

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use wb_common::{Template, TemplateStatus};

use crate::error::{Result, StoreError};
use crate::{from_millis, from_millis_opt, to_millis};

const TABLE: &str = "templates";

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS templates (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    name TEXT NOT NULL,
    language TEXT NOT NULL,
    category TEXT NOT NULL,
    status TEXT NOT NULL,
    components TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_templates_account ON templates(account_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_templates_live_name
    ON templates(account_id, name, language) WHERE deleted_at IS NULL;
"#;

const COLUMNS: &str =
    "id, account_id, name, language, category, status, components, \
     created_at, updated_at, deleted_at";

pub struct SqliteTemplateRepository {
    pool: SqlitePool,
}

impl SqliteTemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> Result<Template> {
        let category: String = row.get("category");
        let status: String = row.get("status");
        let components: String = row.get("components");

        Ok(Template {
            id: row.get("id"),
            account_id: row.get("account_id"),
            name: row.get("name"),
            language: row.get("language"),
            category: category.parse().map_err(|e: String| StoreError::corrupt(TABLE, e))?,
            status: status.parse().map_err(|e: String| StoreError::corrupt(TABLE, e))?,
            components: serde_json::from_str(&components)?,
            created_at: from_millis(TABLE, "created_at", row.get("created_at"))?,
            updated_at: from_millis(TABLE, "updated_at", row.get("updated_at"))?,
            deleted_at: from_millis_opt(TABLE, "deleted_at", row.get("deleted_at"))?,
        })
    }

    pub async fn insert(&self, template: &Template) -> Result<()> {
        let components = serde_json::to_string(&template.components)?;
        let query = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TABLE, COLUMNS
        );

        sqlx::query(&query)
            .bind(&template.id)
            .bind(&template.account_id)
            .bind(&template.name)
            .bind(&template.language)
            .bind(template.category.as_str())
            .bind(template.status.as_str())
            .bind(components)
            .bind(to_millis(&template.created_at))
            .bind(to_millis(&template.updated_at))
            .bind(template.deleted_at.as_ref().map(to_millis))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Duplicate(format!(
                        "Template '{}' ({}) already exists for account {}",
                        template.name, template.language, template.account_id
                    ))
                } else {
                    e.into()
                }
            })?;

        info!(template_id = %template.id, name = %template.name, "Template created");
        Ok(())
    }

    /// Live (not soft-deleted) template by id
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Template>> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = ? AND deleted_at IS NULL",
            COLUMNS, TABLE
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    pub async fn find_by_account(&self, account_id: &str) -> Result<Vec<Template>> {
        let query = format!(
            "SELECT {} FROM {} WHERE account_id = ? AND deleted_at IS NULL ORDER BY created_at ASC",
            COLUMNS, TABLE
        );
        let rows = sqlx::query(&query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        let templates = rows.iter().map(Self::parse_row).collect::<Result<Vec<_>>>()?;
        debug!(account_id, count = templates.len(), "Fetched templates");
        Ok(templates)
    }

    pub async fn exists_by_name(
        &self,
        account_id: &str,
        name: &str,
        language: &str,
    ) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM templates \
             WHERE account_id = ? AND name = ? AND language = ? AND deleted_at IS NULL",
        )
        .bind(account_id)
        .bind(name)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn update_status(&self, id: &str, status: TemplateStatus) -> Result<Template> {
        let result = sqlx::query(
            "UPDATE templates SET status = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }
        info!(template_id = id, status = status.as_str(), "Template status updated");

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Template", id))
    }

    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE templates SET deleted_at = ?, updated_at = ? \
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Template", id));
        }
        info!(template_id = id, "Template soft-deleted");
        Ok(())
    }
}
