//! Configuration loader: optional JSON document overlaid with `DEPOT_*` environment variables.
//!
//! # Design
//! - The environment is captured as a snapshot so loading stays deterministic in tests.
//! - Every override is parsed strictly; malformed values are reported, never ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{DepotConfig, LogFormatSetting};
use crate::validate::validate_config;

const ENV_PREFIX: &str = "DEPOT_";
const ENV_STORAGE_ROOT: &str = "DEPOT_STORAGE_ROOT";
const ENV_STAGING_DIR: &str = "DEPOT_STAGING_DIR";
const ENV_LOG_LEVEL: &str = "DEPOT_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "DEPOT_LOG_FORMAT";
const ENV_FETCH_TIMEOUT: &str = "DEPOT_FETCH_TIMEOUT_SECS";
const ENV_FETCH_MAX_BYTES: &str = "DEPOT_FETCH_MAX_BYTES";
const ENV_MERGE_CHECK_EXIST: &str = "DEPOT_MERGE_CHECK_EXIST";

/// Builder that resolves a [`DepotConfig`] from a file and environment overrides.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl ConfigLoader {
    /// Loader with no file and an empty environment snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader seeded with every `DEPOT_*` variable from the process environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        let env = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        Self { file: None, env }
    }

    /// Read the given JSON document before applying overrides.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Add or replace a single override in the environment snapshot.
    #[must_use]
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Resolve and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, when an
    /// override is malformed, or when the merged document fails validation.
    pub fn load(&self) -> ConfigResult<DepotConfig> {
        let mut config = match &self.file {
            Some(path) => read_document(path)?,
            None => DepotConfig::default(),
        };
        self.apply_overrides(&mut config)?;
        validate_config(&config)?;
        debug!(
            storage_root = %config.storage_root.display(),
            log_format = config.logging.format.as_str(),
            "configuration resolved"
        );
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut DepotConfig) -> ConfigResult<()> {
        if let Some(value) = self.var(ENV_STORAGE_ROOT) {
            config.storage_root = PathBuf::from(value);
        }
        if let Some(value) = self.var(ENV_STAGING_DIR) {
            config.staging_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = self.var(ENV_LOG_LEVEL) {
            config.logging.level = value.to_string();
        }
        if let Some(value) = self.var(ENV_LOG_FORMAT) {
            config.logging.format = value.parse::<LogFormatSetting>()?;
        }
        if let Some(value) = self.var(ENV_FETCH_TIMEOUT) {
            config.fetch.timeout_secs = parse_u64("fetch", "timeout_secs", value)?;
        }
        if let Some(value) = self.var(ENV_FETCH_MAX_BYTES) {
            config.fetch.max_bytes = parse_u64("fetch", "max_bytes", value)?;
        }
        if let Some(value) = self.var(ENV_MERGE_CHECK_EXIST) {
            config.check_exist.merge = parse_bool("check_exist", "merge", value)?;
        }
        Ok(())
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.env
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

fn read_document(path: &Path) -> ConfigResult<DepotConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_u64(section: &'static str, field: &'static str, value: &str) -> ConfigResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(section, field, value.to_string(), "not_an_integer"))
}

fn parse_bool(section: &'static str, field: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            section,
            field,
            value.to_string(),
            "not_a_boolean",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use depot_test_support::fixtures::temp_dir;

    #[test]
    fn file_values_are_overridden_by_environment() -> Result<()> {
        let temp = temp_dir("depot-config-")?;
        let path = temp.path().join("depot.json");
        fs::write(
            &path,
            r#"{"storage_root": "/srv/files", "logging": {"level": "debug"}}"#,
        )?;

        let config = ConfigLoader::new()
            .with_file(&path)
            .with_env_var(ENV_LOG_LEVEL, "warn")
            .with_env_var(ENV_MERGE_CHECK_EXIST, "yes")
            .load()?;

        assert_eq!(config.storage_root, PathBuf::from("/srv/files"));
        assert_eq!(config.logging.level, "warn");
        assert!(config.check_exist.merge);
        Ok(())
    }

    #[test]
    fn blank_overrides_are_ignored() -> Result<()> {
        let config = ConfigLoader::new()
            .with_env_var(ENV_STORAGE_ROOT, "   ")
            .load()?;
        assert_eq!(config, DepotConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_numeric_override_is_rejected() {
        let result = ConfigLoader::new()
            .with_env_var(ENV_FETCH_TIMEOUT, "soon")
            .load();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                field: "timeout_secs",
                reason: "not_an_integer",
                ..
            })
        ));
    }

    #[test]
    fn malformed_boolean_override_is_rejected() {
        let result = ConfigLoader::new()
            .with_env_var(ENV_MERGE_CHECK_EXIST, "maybe")
            .load();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                reason: "not_a_boolean",
                ..
            })
        ));
    }

    #[test]
    fn unreadable_file_reports_io_error() -> Result<()> {
        let temp = temp_dir("depot-config-")?;
        let result = ConfigLoader::new()
            .with_file(temp.path().join("missing.json"))
            .load();
        assert!(matches!(result, Err(ConfigError::Io { .. })));
        Ok(())
    }

    #[test]
    fn malformed_file_reports_parse_error() -> Result<()> {
        let temp = temp_dir("depot-config-")?;
        let path = temp.path().join("depot.json");
        fs::write(&path, "{ not json")?;
        let result = ConfigLoader::new().with_file(&path).load();
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        Ok(())
    }
}
