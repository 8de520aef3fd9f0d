//! Validation and parsing helpers for configuration values.

use std::path::Path;

use crate::defaults::MAX_EXPIRATION_YEARS;
use crate::error::{ConfigError, ConfigResult};
use crate::model::PipelineConfig;

const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

/// Check every field of a fully merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate(config: &PipelineConfig) -> ConfigResult<()> {
    validate_database(&config.database)?;
    validate_dir("data_dir", &config.data_dir)?;
    validate_dir("backup_dir", &config.backup_dir)?;
    config.progress_granularity()?;
    if config.expiration_years > MAX_EXPIRATION_YEARS {
        return Err(ConfigError::invalid(
            "expiration_years",
            config.expiration_years.to_string(),
            "must be at most 100",
        ));
    }
    if let Some(blank) = config
        .fatal_patterns
        .iter()
        .find(|phrase| phrase.trim().is_empty())
    {
        return Err(ConfigError::invalid(
            "fatal_patterns",
            blank.clone(),
            "must not contain blank phrases",
        ));
    }
    if config.logging.level.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            field: "logging.level",
            value: None,
            reason: "must not be empty",
        });
    }
    if let Some(format) = &config.logging.format
        && !LOG_FORMATS.contains(&format.as_str())
    {
        return Err(ConfigError::invalid(
            "logging.format",
            format.clone(),
            "must be 'pretty' or 'json'",
        ));
    }
    Ok(())
}

fn validate_database(database: &str) -> ConfigResult<()> {
    if database.trim().is_empty() {
        return Err(ConfigError::InvalidField {
            field: "database",
            value: None,
            reason: "must not be empty",
        });
    }
    if database.starts_with('.') || database.contains(['/', '\\']) {
        return Err(ConfigError::invalid(
            "database",
            database,
            "must be a plain database name",
        ));
    }
    Ok(())
}

fn validate_dir(field: &'static str, dir: &Path) -> ConfigResult<()> {
    if dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            value: None,
            reason: "must not be empty",
        });
    }
    Ok(())
}

pub(crate) fn parse_u8(field: &'static str, raw: &str) -> ConfigResult<u8> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, raw, "must be an integer between 0 and 255"))
}

pub(crate) fn parse_u32(field: &'static str, raw: &str) -> ConfigResult<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, raw, "must be a non-negative integer"))
}

/// Split a comma-separated phrase list, dropping empty entries.
pub(crate) fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .map(str::to_string)
        .collect()
}
