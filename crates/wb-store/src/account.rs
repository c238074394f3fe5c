//! WhatsApp account repository

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;
use wb_common::WhatsAppAccount;

use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis};

const TABLE: &str = "whatsapp_accounts";

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS whatsapp_accounts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE,
    waba_id TEXT NOT NULL,
    phone_number_id TEXT NOT NULL UNIQUE,
    display_phone_number TEXT,
    access_token TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

const COLUMNS: &str =
    "id, user_id, waba_id, phone_number_id, display_phone_number, access_token, \
     created_at, updated_at";

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> Result<WhatsAppAccount> {
        Ok(WhatsAppAccount {
            id: row.get("id"),
            user_id: row.get("user_id"),
            waba_id: row.get("waba_id"),
            phone_number_id: row.get("phone_number_id"),
            display_phone_number: row.get("display_phone_number"),
            access_token: row.get("access_token"),
            created_at: from_millis(TABLE, "created_at", row.get("created_at"))?,
            updated_at: from_millis(TABLE, "updated_at", row.get("updated_at"))?,
        })
    }

    pub async fn insert(&self, account: &WhatsAppAccount) -> Result<()> {
        let query = format!("INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)", TABLE, COLUMNS);
        sqlx::query(&query)
            .bind(&account.id)
            .bind(&account.user_id)
            .bind(&account.waba_id)
            .bind(&account.phone_number_id)
            .bind(&account.display_phone_number)
            .bind(&account.access_token)
            .bind(to_millis(&account.created_at))
            .bind(to_millis(&account.updated_at))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Duplicate(format!(
                        "An account for user {} or phone number id {} already exists",
                        account.user_id, account.phone_number_id
                    ))
                } else {
                    e.into()
                }
            })?;

        info!(account_id = %account.id, user_id = %account.user_id, "WhatsApp account registered");
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<WhatsAppAccount>> {
        let query = format!("SELECT {} FROM {} WHERE id = ?", COLUMNS, TABLE);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    /// Sender credentials for a user
    pub async fn find_by_user_id(&self, user_id: &str) -> Result<Option<WhatsAppAccount>> {
        let query = format!("SELECT {} FROM {} WHERE user_id = ?", COLUMNS, TABLE);
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    pub async fn exists_by_phone_number_id(&self, phone_number_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM whatsapp_accounts WHERE phone_number_id = ?")
                .bind(phone_number_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}
