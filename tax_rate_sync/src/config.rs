//! Service configuration loaded from a TOML file.
//!
//! Credentials, endpoint paths and optional payload templates are stored
//! obfuscated (see [`crate::secret`]) and are only decoded when an update
//! cycle needs them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::gateway::DEFAULT_USER_AGENT;
use crate::payload::{format_date, DEFAULT_START_DATE_FORMAT};
use crate::secret::{EncodedSecret, PaddingStrategy};

const DEFAULT_WINDOW_DAYS: u32 = 21;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Pause between trigger checks, in milliseconds.
    pub interval_ms: u64,

    /// Records changed within this many days before today are resubmitted.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    pub api: ApiConfig,

    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    pub login_path: EncodedSecret,
    pub update_path: EncodedSecret,
    pub username: EncodedSecret,
    pub password: EncodedSecret,
    pub tenant: EncodedSecret,

    #[serde(default)]
    pub padding: PaddingStrategy,

    /// Overrides the built-in login body template.
    #[serde(default)]
    pub login_template: Option<EncodedSecret>,

    /// Overrides the built-in update body template.
    #[serde(default)]
    pub update_template: Option<EncodedSecret>,

    #[serde(default = "default_start_date_format")]
    pub start_date_format: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// NDJSON export of warehouse tax rate records.
    pub records_path: PathBuf,

    /// NDJSON file the update log is appended to.
    pub log_store_path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

fn default_start_date_format() -> String {
    DEFAULT_START_DATE_FORMAT.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be positive".to_string()));
        }
        if self.window_days == 0 {
            return Err(ConfigError::Invalid("window_days must be positive".to_string()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".to_string()));
        }
        self.api
            .padding
            .check()
            .map_err(|e| ConfigError::Invalid(format!("api.padding: {e}")))?;
        // Render once: some valid specifiers (%z, %Z) need a timezone.
        format_date(NaiveDate::MIN, &self.api.start_date_format)
            .map_err(|e| ConfigError::Invalid(format!("api.start_date_format: {e}")))?;
        Ok(())
    }
}
