//! Post-load validation for configuration documents.

use crate::error::{ConfigError, ConfigResult};
use crate::model::DepotConfig;

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails validation.
pub fn validate_config(config: &DepotConfig) -> ConfigResult<()> {
    if config.storage_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            "storage",
            "storage_root",
            None,
            "empty",
        ));
    }
    if config
        .staging_dir
        .as_ref()
        .is_some_and(|dir| dir.as_os_str().is_empty())
    {
        return Err(ConfigError::invalid("storage", "staging_dir", None, "empty"));
    }
    if config.fetch.timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "fetch",
            "timeout_secs",
            Some("0".to_string()),
            "must_be_positive",
        ));
    }
    if config.fetch.max_bytes == 0 {
        return Err(ConfigError::invalid(
            "fetch",
            "max_bytes",
            Some("0".to_string()),
            "must_be_positive",
        ));
    }
    if config.logging.level.trim().is_empty() {
        return Err(ConfigError::invalid("logging", "level", None, "empty"));
    }
    Ok(())
}
