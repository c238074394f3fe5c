//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "wabroadcast.toml",
    "./config/config.toml",
    "/etc/wabroadcast/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist");
        }

        if let Ok(path) = env::var("WB_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(val) = lookup(key) {
        match val.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key, value = %val, "Ignoring unparseable environment override"),
        }
    }
}

fn set_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(val) = lookup(key) {
        *target = val;
    }
}

/// Apply `WB_*` overrides read through `lookup`
pub(crate) fn apply_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    // HTTP
    parse_into(&lookup, "WB_HTTP_PORT", &mut config.http.port);
    set_string(&lookup, "WB_HTTP_HOST", &mut config.http.host);
    if let Some(val) = lookup("WB_CORS_ORIGINS") {
        config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
    }

    // Database
    set_string(&lookup, "WB_DATABASE_URL", &mut config.database.url);
    parse_into(&lookup, "WB_DATABASE_MAX_CONNECTIONS", &mut config.database.max_connections);

    // Messaging
    set_string(&lookup, "WB_MESSAGING_BASE_URL", &mut config.messaging.base_url);
    set_string(&lookup, "WB_MESSAGING_API_VERSION", &mut config.messaging.api_version);
    parse_into(&lookup, "WB_MESSAGING_TIMEOUT_MS", &mut config.messaging.timeout_ms);
    parse_into(&lookup, "WB_MESSAGING_MAX_RETRIES", &mut config.messaging.max_retries);
    parse_into(
        &lookup,
        "WB_MESSAGING_MAX_RETRY_AFTER_MS",
        &mut config.messaging.max_retry_after_ms,
    );
    parse_into(
        &lookup,
        "WB_MESSAGING_RATE_LIMIT_PER_SECOND",
        &mut config.messaging.rate_limit_per_second,
    );

    // Dispatch
    parse_into(&lookup, "WB_DISPATCH_CORE_WORKERS", &mut config.dispatch.core_workers);
    parse_into(&lookup, "WB_DISPATCH_MAX_WORKERS", &mut config.dispatch.max_workers);
    parse_into(&lookup, "WB_DISPATCH_QUEUE_CAPACITY", &mut config.dispatch.queue_capacity);
    parse_into(&lookup, "WB_DISPATCH_SUBMIT_TIMEOUT_MS", &mut config.dispatch.submit_timeout_ms);
    parse_into(
        &lookup,
        "WB_DISPATCH_SHUTDOWN_TIMEOUT_SECS",
        &mut config.dispatch.shutdown_timeout_secs,
    );
    parse_into(
        &lookup,
        "WB_DISPATCH_BATCH_RETENTION_SECS",
        &mut config.dispatch.batch_retention_secs,
    );

    // Media
    set_string(&lookup, "WB_MEDIA_UPLOAD_DIR", &mut config.media.upload_dir);
    set_string(&lookup, "WB_MEDIA_URL_PREFIX", &mut config.media.url_prefix);
    parse_into(&lookup, "WB_MEDIA_MAX_UPLOAD_BYTES", &mut config.media.max_upload_bytes);

    // General
    parse_into(&lookup, "WB_DEV_MODE", &mut config.dev_mode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = AppConfig::default();
        apply_overrides(
            &mut config,
            lookup_from(&[
                ("WB_HTTP_PORT", "9090"),
                ("WB_DATABASE_URL", "sqlite::memory:"),
                ("WB_DISPATCH_CORE_WORKERS", "4"),
                ("WB_DISPATCH_MAX_WORKERS", "6"),
                ("WB_CORS_ORIGINS", "http://a.test, http://b.test"),
                ("WB_DEV_MODE", "true"),
            ]),
        );

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.dispatch.core_workers, 4);
        assert_eq!(config.dispatch.max_workers, 6);
        assert_eq!(config.http.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert!(config.dev_mode);
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, lookup_from(&[("WB_DISPATCH_QUEUE_CAPACITY", "lots")]));
        assert_eq!(config.dispatch.queue_capacity, 100);
    }

    #[test]
    fn test_explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 7070\n\n[media]\nupload_dir = \"/tmp/wb\"").unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.http.port, 7070);
        assert_eq!(config.media.upload_dir, "/tmp/wb");
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\ncore_workers = 30\nmax_workers = 20").unwrap();

        let result = ConfigLoader::with_path(file.path()).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
