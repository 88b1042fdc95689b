//! # Configuration
//!
//! Settings come from an optional TOML file and are then overridden by the
//! process environment:
//!
//! | Variable                 | Field             | Default     |
//! |--------------------------|-------------------|-------------|
//! | `TABLE_NAME`             | `table_name`      | `fleetlink` |
//! | `CUSTOMERS_TABLE`        | `customers_table` | same table  |
//! | `DEV_MODE`               | `dev_mode`        | `false`     |
//! | `KMS_KEY_ALIAS`          | `kms_key_alias`   | unset       |
//! | `LOG_LEVEL`              | `log_level`       | unset       |
//! | `FLEETLINK_API_KEY`      | `api_key`         | unset       |
//! | `FLEETLINK_RATE_LIMIT`   | `rate_limit`      | `100`       |
//! | `FLEETLINK_CORS_ORIGINS` | `cors_origins`    | `*`         |

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default logical table name.
pub const DEFAULT_TABLE: &str = "fleetlink";

/// Default global rate limit in requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure to assemble a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

// =============================================================================
// CONFIG
// =============================================================================

/// Runtime settings of the server and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Logical table holding devices, SIMs, installs, surveys and regions.
    pub table_name: String,
    /// Separate table for customers and their contacts.
    pub customers_table: Option<String>,
    /// Bypass API key authentication.
    pub dev_mode: bool,
    /// Field-encryption key alias. Recorded only.
    pub kms_key_alias: Option<String>,
    /// Log verbosity (`trace`, `debug`, `info`, `warn`, `error`).
    pub log_level: Option<String>,
    pub api_key: Option<String>,
    /// Requests per second; 0 disables the limiter.
    pub rate_limit: u32,
    /// `*` or a comma-separated origin list.
    pub cors_origins: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE.to_string(),
            customers_table: None,
            dev_mode: false,
            kms_key_alias: None,
            log_level: None,
            api_key: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            cors_origins: "*".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (if any), then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text; absent keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from `lookup` (the environment in production).
    ///
    /// Empty values clear optional fields.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TABLE_NAME").filter(|v| !v.is_empty()) {
            self.table_name = v;
        }
        if let Some(v) = lookup("CUSTOMERS_TABLE") {
            self.customers_table = non_empty(v);
        }
        if let Some(v) = lookup("DEV_MODE") {
            self.dev_mode = parse_flag("DEV_MODE", &v)?;
        }
        if let Some(v) = lookup("KMS_KEY_ALIAS") {
            self.kms_key_alias = non_empty(v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = non_empty(v);
        }
        if let Some(v) = lookup("FLEETLINK_API_KEY") {
            self.api_key = non_empty(v);
        }
        if let Some(v) = lookup("FLEETLINK_RATE_LIMIT") {
            self.rate_limit = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "FLEETLINK_RATE_LIMIT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("FLEETLINK_CORS_ORIGINS").filter(|v| !v.is_empty()) {
            self.cors_origins = v;
        }
        Ok(())
    }

    /// Table for customer records.
    #[must_use]
    pub fn customers_table(&self) -> &str {
        self.customers_table.as_deref().unwrap_or(&self.table_name)
    }

    /// The configured API key, unless dev mode disables authentication.
    #[must_use]
    pub fn effective_api_key(&self) -> Option<&str> {
        if self.dev_mode {
            None
        } else {
            self.api_key.as_deref()
        }
    }

    /// `EnvFilter` directive for `log_level`.
    #[must_use]
    pub fn log_directive(&self) -> Option<String> {
        self.log_level.as_deref().map(|level| {
            let level = level.to_ascii_lowercase();
            format!(
                "fleetlink={level},fleetlink_core={level},tower_http={level}"
            )
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

// =============================================================================
// TESTS
// =============================================================================
