//! Layered configuration loading.
//!
//! Sources are applied in order: built-in defaults, an optional JSON file,
//! `DBVAULT_*` environment variables, then command-line overrides. The merged
//! result is validated once at the end.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ConfigOverrides, PipelineConfig};
use crate::validate::{parse_u8, parse_u32, split_patterns, validate};

/// Environment variable naming the configuration file.
pub const CONFIG_FILE_ENV: &str = "DBVAULT_CONFIG";
const DATABASE_ENV: &str = "DBVAULT_DATABASE";
const DATA_DIR_ENV: &str = "DBVAULT_DATA_DIR";
const BACKUP_DIR_ENV: &str = "DBVAULT_BACKUP_DIR";
const PROGRESS_PERCENT_ENV: &str = "DBVAULT_PROGRESS_PERCENT";
const FATAL_PATTERNS_ENV: &str = "DBVAULT_FATAL_PATTERNS";
const EXPIRATION_YEARS_ENV: &str = "DBVAULT_EXPIRATION_YEARS";
const LOG_LEVEL_ENV: &str = "DBVAULT_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "DBVAULT_LOG_FORMAT";

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read or parsed, or when a
/// merged value fails validation.
pub fn load(file: Option<&Path>, overrides: ConfigOverrides) -> ConfigResult<PipelineConfig> {
    load_with(file, overrides, |name| std::env::var(name).ok())
}

/// Load configuration, resolving environment variables through `lookup`.
///
/// # Errors
///
/// See [`load`].
pub fn load_with<F>(
    file: Option<&Path>,
    overrides: ConfigOverrides,
    lookup: F,
) -> ConfigResult<PipelineConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let path = file.map(Path::to_path_buf).or_else(|| {
        lookup(CONFIG_FILE_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    });
    let mut config = match &path {
        Some(path) => read_file(path)?,
        None => PipelineConfig::default(),
    };
    apply_env(&mut config, &lookup)?;
    config.apply_overrides(overrides);
    validate(&config)?;
    debug!(
        file = ?path,
        database = %config.database,
        data_dir = %config.data_dir.display(),
        backup_dir = %config.backup_dir.display(),
        "configuration loaded"
    );
    Ok(config)
}

/// Parse a JSON configuration file; missing fields take their defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
pub fn read_file(path: &Path) -> ConfigResult<PipelineConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "config.read",
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env<F>(config: &mut PipelineConfig, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(database) = var(DATABASE_ENV) {
        config.database = database;
    }
    if let Some(dir) = var(DATA_DIR_ENV) {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(dir) = var(BACKUP_DIR_ENV) {
        config.backup_dir = PathBuf::from(dir);
    }
    if let Some(raw) = var(PROGRESS_PERCENT_ENV) {
        config.progress_percent = parse_u8("progress_percent", &raw)?;
    }
    if let Some(raw) = var(FATAL_PATTERNS_ENV) {
        config.fatal_patterns.extend(split_patterns(&raw));
    }
    if let Some(raw) = var(EXPIRATION_YEARS_ENV) {
        config.expiration_years = parse_u32("expiration_years", &raw)?;
    }
    if let Some(level) = var(LOG_LEVEL_ENV) {
        config.logging.level = level;
    }
    if let Some(format) = var(LOG_FORMAT_ENV) {
        config.logging.format = Some(format);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn no_sources_yields_defaults() -> Result<()> {
        let config = load_with(None, ConfigOverrides::default(), env(&[]))?;
        assert_eq!(config, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn environment_overrides_defaults() -> Result<()> {
        let config = load_with(
            None,
            ConfigOverrides::default(),
            env(&[
                ("DBVAULT_DATABASE", "Pubs"),
                ("DBVAULT_PROGRESS_PERCENT", "5"),
                ("DBVAULT_FATAL_PATTERNS", "media is full, write-protected"),
                ("DBVAULT_EXPIRATION_YEARS", "2"),
                ("DBVAULT_LOG_FORMAT", "json"),
                ("DBVAULT_DATA_DIR", " "),
            ]),
        )?;
        assert_eq!(config.database, "Pubs");
        assert_eq!(config.progress_percent, 5);
        assert_eq!(config.fatal_patterns, vec!["media is full", "write-protected"]);
        assert_eq!(config.expiration_years, 2);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.data_dir, PathBuf::from("data"));
        Ok(())
    }

    #[test]
    fn overrides_beat_environment() -> Result<()> {
        let config = load_with(
            None,
            ConfigOverrides {
                database: Some("AdventureWorks".to_string()),
                ..ConfigOverrides::default()
            },
            env(&[("DBVAULT_DATABASE", "Pubs")]),
        )?;
        assert_eq!(config.database, "AdventureWorks");
        Ok(())
    }

    #[test]
    fn malformed_environment_value_names_the_field() {
        let result = load_with(
            None,
            ConfigOverrides::default(),
            env(&[("DBVAULT_PROGRESS_PERCENT", "often")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                field: "progress_percent",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_value_fails_validation() {
        let result = load_with(
            None,
            ConfigOverrides {
                progress_percent: Some(0),
                ..ConfigOverrides::default()
            },
            env(&[]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidField {
                field: "progress_percent",
                ..
            })
        ));
    }

    #[test]
    fn missing_file_from_environment_is_an_io_error() {
        let result = load_with(
            None,
            ConfigOverrides::default(),
            env(&[("DBVAULT_CONFIG", "/nonexistent/dbvault.json")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::Io {
                operation: "config.read",
                ..
            })
        ));
    }
}
