//! SQLite repositories for the WaBroadcast records.
//!
//! Ids are uuid strings, timestamps are stored as epoch milliseconds and soft
//! deletes set `deleted_at`. Every lookup that returns live records filters on
//! `deleted_at IS NULL`.

pub mod account;
pub mod country;
pub mod error;
pub mod media;
pub mod template;
pub mod wallet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use wb_config::DatabaseConfig;

pub use account::SqliteAccountRepository;
pub use country::SqliteCountryRepository;
pub use error::{Result, StoreError};
pub use media::SqliteBroadcastMediaRepository;
pub use template::SqliteTemplateRepository;
pub use wallet::SqliteWalletRepository;

/// Open a pool against the configured database
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await?;

    info!(url = %config.url, max_connections = config.max_connections, "Connected to SQLite");
    Ok(pool)
}

/// Create all tables and indexes if missing
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        template::SCHEMA,
        account::SCHEMA,
        wallet::SCHEMA,
        country::SCHEMA,
        media::SCHEMA,
    ];
    for schema in statements {
        sqlx::raw_sql(schema).execute(pool).await?;
    }
    info!("Initialized SQLite schema");
    Ok(())
}

/// All repositories over one shared pool
#[derive(Clone)]
pub struct Repositories {
    pub templates: Arc<SqliteTemplateRepository>,
    pub accounts: Arc<SqliteAccountRepository>,
    pub wallets: Arc<SqliteWalletRepository>,
    pub countries: Arc<SqliteCountryRepository>,
    pub media: Arc<SqliteBroadcastMediaRepository>,
    pool: SqlitePool,
}

impl Repositories {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            templates: Arc::new(SqliteTemplateRepository::new(pool.clone())),
            accounts: Arc::new(SqliteAccountRepository::new(pool.clone())),
            wallets: Arc::new(SqliteWalletRepository::new(pool.clone())),
            countries: Arc::new(SqliteCountryRepository::new(pool.clone())),
            media: Arc::new(SqliteBroadcastMediaRepository::new(pool.clone())),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness check used by the readiness endpoint
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(table: &'static str, column: &str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::corrupt(table, format!("invalid {} timestamp {}", column, ms)))
}

pub(crate) fn from_millis_opt(
    table: &'static str,
    column: &str,
    ms: Option<i64>,
) -> Result<Option<DateTime<Utc>>> {
    ms.map(|ms| from_millis(table, column, ms)).transpose()
}
