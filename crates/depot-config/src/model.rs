//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; loading and validation live in sibling modules.
//! - Every section defaults sensibly so an empty document is a valid config.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigError;

/// Root configuration document for the depot service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    /// Root directory served by the local-disk provider.
    pub storage_root: PathBuf,
    /// Directory used for transient archive and fetch files; the OS temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    /// Per-verb defaults for the `check_exist` request flag.
    pub check_exist: CheckExistDefaults,
    /// Remote URL fetch limits.
    pub fetch: FetchConfig,
    /// Logging output settings.
    pub logging: LoggingSettings,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(defaults::STORAGE_ROOT),
            staging_dir: None,
            check_exist: CheckExistDefaults::default(),
            fetch: FetchConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl DepotConfig {
    /// Directory where transient files are staged.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Existence-check defaults applied when a request omits `check_exist`.
///
/// `merge` shares the replace algorithm; whether its default should diverge
/// from `replace` is left to deployment configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckExistDefaults {
    /// Default for create requests.
    pub create: bool,
    /// Default for replace requests.
    pub replace: bool,
    /// Default for merge requests.
    pub merge: bool,
}

impl Default for CheckExistDefaults {
    fn default() -> Self {
        Self {
            create: true,
            replace: false,
            merge: false,
        }
    }
}

/// Limits applied to remote URL ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum number of bytes accepted from a single fetch.
    pub max_bytes: u64,
    /// User agent sent with fetch requests.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            max_bytes: defaults::FETCH_MAX_BYTES,
            user_agent: defaults::FETCH_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    /// Timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level directive used when `RUST_LOG` is absent.
    pub level: String,
    /// Output format.
    pub format: LogFormatSetting,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogFormatSetting::Pretty,
        }
    }
}

/// Log output format as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    /// Human-readable output.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormatSetting {
    /// Render the format as its configuration string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl FromStr for LogFormatSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::invalid(
                "logging",
                "format",
                s.to_string(),
                "unknown_format",
            )),
        }
    }
}
