//! Wallet repository

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use wb_common::Wallet;

use crate::error::{Result, StoreError};
use crate::{from_millis, to_millis};

const TABLE: &str = "wallets";

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE,
    balance_minor INTEGER NOT NULL DEFAULT 0 CHECK (balance_minor >= 0),
    currency TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

const COLUMNS: &str = "id, user_id, balance_minor, currency, created_at, updated_at";

pub struct SqliteWalletRepository {
    pool: SqlitePool,
}

impl SqliteWalletRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> Result<Wallet> {
        Ok(Wallet {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            balance_minor: row
                .try_get("balance_minor")
                .map_err(|e| StoreError::corrupt(TABLE, e.to_string()))?,
            currency: row.try_get("currency")?,
            created_at: from_millis(TABLE, "created_at", row.try_get("created_at")?)?,
            updated_at: from_millis(TABLE, "updated_at", row.try_get("updated_at")?)?,
        })
    }

    pub async fn insert(&self, wallet: &Wallet) -> Result<()> {
        let query = format!("INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?)", TABLE, COLUMNS);
        sqlx::query(&query)
            .bind(&wallet.id)
            .bind(&wallet.user_id)
            .bind(wallet.balance_minor)
            .bind(&wallet.currency)
            .bind(to_millis(&wallet.created_at))
            .bind(to_millis(&wallet.updated_at))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Duplicate(format!(
                        "Wallet already exists for user {}",
                        wallet.user_id
                    ))
                } else {
                    e.into()
                }
            })?;

        info!(wallet_id = %wallet.id, user_id = %wallet.user_id, "Wallet created");
        Ok(())
    }

    pub async fn find_by_user_id(&self, user_id: &str) -> Result<Option<Wallet>> {
        let query = format!("SELECT {} FROM {} WHERE user_id = ?", COLUMNS, TABLE);
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    pub async fn exists_by_user_id(&self, user_id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Add `delta` (negative for a debit). The balance never goes below zero
    /// and never exceeds `i64::MAX`.
    ///
    /// The new balance is computed here and written with a compare-and-set on
    /// the old one; a concurrent adjustment makes the write miss and the loop
    /// re-reads.
    pub async fn adjust_balance(&self, user_id: &str, delta: i64) -> Result<Wallet> {
        loop {
            let wallet = self
                .find_by_user_id(user_id)
                .await?
                .ok_or_else(|| StoreError::not_found("Wallet", user_id))?;
            let current = wallet.balance_minor;

            let Some(next) = current.checked_add(delta) else {
                warn!(user_id, balance = current, delta, "Credit would overflow wallet balance");
                return Err(StoreError::BalanceOverflow {
                    balance: current,
                    delta,
                });
            };
            if next < 0 {
                warn!(user_id, balance = current, delta, "Debit exceeds wallet balance");
                return Err(StoreError::InsufficientBalance {
                    balance: current,
                    requested: -delta,
                });
            }

            let updated_at = from_millis(TABLE, "updated_at", Utc::now().timestamp_millis())?;
            let result = sqlx::query(
                "UPDATE wallets SET balance_minor = ?, updated_at = ? \
                 WHERE user_id = ? AND balance_minor = ?",
            )
            .bind(next)
            .bind(to_millis(&updated_at))
            .bind(user_id)
            .bind(current)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                info!(user_id, delta, balance = next, "Wallet balance adjusted");
                return Ok(Wallet {
                    balance_minor: next,
                    updated_at,
                    ..wallet
                });
            }
            debug!(user_id, "Concurrent wallet update, retrying");
        }
    }
}
