//! WaBroadcast Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub messaging: MessagingConfig,
    pub dispatch: DispatchConfig,
    pub media: MediaConfig,

    /// Enable development mode
    pub dev_mode: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://wabroadcast.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

/// Messaging API client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub base_url: String,
    pub api_version: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Delay before each retry; the last entry repeats
    pub retry_delays_ms: Vec<u64>,
    /// Ceiling for a server-supplied `Retry-After` wait
    pub max_retry_after_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_secs: u64,
    /// Sends per second across all workers, 0 disables limiting
    pub rate_limit_per_second: u32,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            timeout_ms: 15_000,
            connect_timeout_ms: 5_000,
            max_retries: 2,
            retry_delays_ms: vec![500, 2_000],
            max_retry_after_ms: 5_000,
            circuit_breaker_threshold: 10,
            circuit_breaker_reset_secs: 30,
            rate_limit_per_second: 0,
        }
    }
}

impl MessagingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before retry `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let last = self.retry_delays_ms.len().saturating_sub(1);
        let idx = (attempt.saturating_sub(1) as usize).min(last);
        Duration::from_millis(self.retry_delays_ms.get(idx).copied().unwrap_or(1_000))
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }
}

/// Dispatch executor and batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// Idle time before a worker above the core count retires
    pub keep_alive_secs: u64,
    /// How long a waiting submission may block on a full executor
    pub submit_timeout_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub thread_name_prefix: String,
    /// How long finished batches stay pollable
    pub batch_retention_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            core_workers: 10,
            max_workers: 20,
            queue_capacity: 100,
            keep_alive_secs: 60,
            submit_timeout_ms: 30_000,
            shutdown_timeout_secs: 60,
            thread_name_prefix: "broadcast-dispatch-".to_string(),
            batch_retention_secs: 3_600,
        }
    }
}

/// Uploaded media storage and serving
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub upload_dir: String,
    /// URL prefix the upload directory is served under
    pub url_prefix: String,
    pub cache_max_age_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            upload_dir: "./uploads".to_string(),
            url_prefix: "/media".to_string(),
            cache_max_age_secs: 604_800, // 7 days
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dispatch;
        if d.core_workers == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.core_workers must be at least 1".to_string(),
            ));
        }
        if d.max_workers < d.core_workers {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.max_workers ({}) must be >= dispatch.core_workers ({})",
                d.max_workers, d.core_workers
            )));
        }
        if d.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.messaging.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "messaging.base_url must not be empty".to_string(),
            ));
        }
        if !self.media.url_prefix.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "media.url_prefix must start with '/', got '{}'",
                self.media.url_prefix
            )));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# WaBroadcast Configuration
# Environment variables (WB_*) override these settings

[http]
port = 8080
host = "0.0.0.0"
cors_origins = ["http://localhost:3000"]

[database]
url = "sqlite://wabroadcast.db?mode=rwc"
max_connections = 10

[messaging]
base_url = "https://graph.facebook.com"
api_version = "v21.0"
timeout_ms = 15000
connect_timeout_ms = 5000
max_retries = 2
retry_delays_ms = [500, 2000]
max_retry_after_ms = 5000
circuit_breaker_threshold = 10
circuit_breaker_reset_secs = 30
rate_limit_per_second = 0  # 0 = unlimited

[dispatch]
core_workers = 10
max_workers = 20
queue_capacity = 100
keep_alive_secs = 60
submit_timeout_ms = 30000
shutdown_timeout_secs = 60
thread_name_prefix = "broadcast-dispatch-"
batch_retention_secs = 3600

[media]
upload_dir = "./uploads"
url_prefix = "/media"
cache_max_age_secs = 604800  # 7 days
max_upload_bytes = 16777216

dev_mode = false
"#
        .to_string()
    }
}
