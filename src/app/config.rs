//! Application configuration loading and logging setup.
//!
//! Configuration is a TOML file with environment overrides for secrets
//! (`.env` via `dotenvy`, §9 Design Notes) — node credentials and
//! notification tokens never live in the checked-in config file.

use std::path::Path;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};

/// `[database]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "fleetsync.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: default_database_url() }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

/// `[notifications]` section: upstream usage reporting endpoint, shared
/// across owners (§6 "optional upstream reporting endpoint").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    pub usage_report_url: Option<String>,
}

/// `[startup]` section: Links Cache warm-up retry budget (§4.D "caller
/// may choose to retry up to 5 times at startup").
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_links_cache_retries")]
    pub links_cache_retries: u32,
}

fn default_links_cache_retries() -> u32 {
    5
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self { links_cache_retries: default_links_cache_retries() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

impl Config {
    /// Loads `path` as TOML, falling back to all-default config if the
    /// file does not exist (a fresh install has no config.toml yet).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Config = toml::from_str(&raw).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    /// Initializes the global `tracing` subscriber from `[logging]`.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_new(&self.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = fmt().with_env_filter(filter);
        if self.logging.json {
            subscriber.json().init();
        } else {
            subscriber.init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.database.url, "fleetsync.db");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_full_toml() {
        let toml = r#"
            [database]
            url = "sqlite:///var/lib/fleetsync/fleetsync.db"

            [logging]
            level = "debug"
            json = true

            [notifications]
            usage_report_url = "https://billing.example/report"

            [startup]
            links_cache_retries = 3
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "sqlite:///var/lib/fleetsync/fleetsync.db");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.notifications.usage_report_url.as_deref(), Some("https://billing.example/report"));
        assert_eq!(config.startup.links_cache_retries, 3);
    }
}
