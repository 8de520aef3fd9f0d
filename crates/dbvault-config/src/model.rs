//! Typed pipeline configuration.

use std::path::PathBuf;

use dbvault_core::{MessageClassifier, ProgressGranularity};
use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_BACKUP_DIR, DEFAULT_DATA_DIR, DEFAULT_DATABASE, DEFAULT_EXPIRATION_YEARS,
    DEFAULT_LOG_LEVEL, DEFAULT_PROGRESS_PERCENT,
};
use crate::error::{ConfigError, ConfigResult};

/// Settings for one backup/restore pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Database the pipeline backs up and restores.
    pub database: String,
    /// Directory holding `<database>.db` files.
    pub data_dir: PathBuf,
    /// Directory relative artifact locations resolve against.
    pub backup_dir: PathBuf,
    /// Progress notification step in percent.
    pub progress_percent: u8,
    /// Extra fatal phrases appended to the default classifier list.
    pub fatal_patterns: Vec<String>,
    /// Years until a full backup set expires.
    pub expiration_years: u32,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            progress_percent: DEFAULT_PROGRESS_PERCENT,
            fatal_patterns: Vec::new(),
            expiration_years: DEFAULT_EXPIRATION_YEARS,
            logging: LoggingSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Validated progress step for operation descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the step is outside `1..=100`.
    pub fn progress_granularity(&self) -> ConfigResult<ProgressGranularity> {
        ProgressGranularity::new(self.progress_percent).map_err(|_| {
            ConfigError::invalid(
                "progress_percent",
                self.progress_percent.to_string(),
                "must be between 1 and 100",
            )
        })
    }

    /// Default classifier extended with the configured phrases.
    #[must_use]
    pub fn classifier(&self) -> MessageClassifier {
        self.fatal_patterns
            .iter()
            .fold(MessageClassifier::default(), |classifier, phrase| {
                classifier.with_pattern(phrase.as_str())
            })
    }

    /// Apply command-line overrides on top of the loaded values.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database) = overrides.database {
            self.database = database;
        }
        if let Some(data_dir) = overrides.data_dir {
            self.data_dir = data_dir;
        }
        if let Some(backup_dir) = overrides.backup_dir {
            self.backup_dir = backup_dir;
        }
        if let Some(percent) = overrides.progress_percent {
            self.progress_percent = percent;
        }
        if let Some(years) = overrides.expiration_years {
            self.expiration_years = years;
        }
        self.fatal_patterns.extend(overrides.fatal_patterns);
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = Some(format);
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Level filter used when `RUST_LOG` is unset.
    pub level: String,
    /// `pretty` or `json`; inferred from the build profile when unset.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}

/// Values supplied on the command line; `None` keeps the loaded value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Database override.
    pub database: Option<String>,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
    /// Backup directory override.
    pub backup_dir: Option<PathBuf>,
    /// Progress step override.
    pub progress_percent: Option<u8>,
    /// Expiration override.
    pub expiration_years: Option<u32>,
    /// Phrases appended to the configured fatal patterns.
    pub fatal_patterns: Vec<String>,
    /// Log level override.
    pub log_level: Option<String>,
    /// Log format override.
    pub log_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.database, "Northwind");
        assert_eq!(config.progress_percent, 10);
        assert_eq!(config.expiration_years, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.format.is_none());
        assert!(config.fatal_patterns.is_empty());
    }

    #[test]
    fn configured_patterns_follow_the_defaults() {
        let config = PipelineConfig {
            fatal_patterns: vec!["write-protected".to_string(), "  ".to_string()],
            ..PipelineConfig::default()
        };
        let classifier = config.classifier();
        let phrases: Vec<_> = classifier
            .patterns()
            .iter()
            .map(|pattern| pattern.phrase().to_string())
            .collect();
        assert_eq!(
            phrases,
            vec![
                "Cannot open backup device",
                "terminating abnormally",
                "write-protected"
            ]
        );
    }

    #[test]
    fn overrides_replace_scalars_and_extend_patterns() -> Result<()> {
        let mut config = PipelineConfig {
            fatal_patterns: vec!["from file".to_string()],
            ..PipelineConfig::default()
        };
        config.apply_overrides(ConfigOverrides {
            database: Some("Pubs".to_string()),
            progress_percent: Some(25),
            fatal_patterns: vec!["from flag".to_string()],
            log_format: Some("json".to_string()),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.database, "Pubs");
        assert_eq!(config.progress_granularity()?.percent(), 25);
        assert_eq!(config.fatal_patterns, vec!["from file", "from flag"]);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.data_dir, PathBuf::from("data"));
        Ok(())
    }

    #[test]
    fn zero_progress_step_is_rejected() {
        let config = PipelineConfig {
            progress_percent: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.progress_granularity(),
            Err(ConfigError::InvalidField {
                field: "progress_percent",
                ..
            })
        ));
    }
}
