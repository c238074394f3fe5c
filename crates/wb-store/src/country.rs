//! Country repository

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;
use wb_common::Country;

use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis};

const TABLE: &str = "countries";

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS countries (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    iso_code TEXT NOT NULL UNIQUE,
    dial_code TEXT NOT NULL,
    message_price_minor INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

const COLUMNS: &str = "id, name, iso_code, dial_code, message_price_minor, created_at";

pub struct SqliteCountryRepository {
    pool: SqlitePool,
}

impl SqliteCountryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> Result<Country> {
        Ok(Country {
            id: row.get("id"),
            name: row.get("name"),
            iso_code: row.get("iso_code"),
            dial_code: row.get("dial_code"),
            message_price_minor: row.get("message_price_minor"),
            created_at: from_millis(TABLE, "created_at", row.get("created_at"))?,
        })
    }

    pub async fn insert(&self, country: &Country) -> Result<()> {
        let query = format!("INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?)", TABLE, COLUMNS);
        sqlx::query(&query)
            .bind(&country.id)
            .bind(&country.name)
            .bind(&country.iso_code)
            .bind(&country.dial_code)
            .bind(country.message_price_minor)
            .bind(to_millis(&country.created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Duplicate(format!("Country {} already exists", country.iso_code))
                } else {
                    e.into()
                }
            })?;

        info!(iso_code = %country.iso_code, "Country added");
        Ok(())
    }

    pub async fn find_by_iso_code(&self, iso_code: &str) -> Result<Option<Country>> {
        let query = format!("SELECT {} FROM {} WHERE iso_code = ?", COLUMNS, TABLE);
        let row = sqlx::query(&query)
            .bind(iso_code.trim().to_ascii_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    pub async fn exists_by_iso_code(&self, iso_code: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM countries WHERE iso_code = ?")
            .bind(iso_code.trim().to_ascii_uppercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn list(&self) -> Result<Vec<Country>> {
        let query = format!("SELECT {} FROM {} ORDER BY name ASC", COLUMNS, TABLE);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_row).collect()
    }
}
