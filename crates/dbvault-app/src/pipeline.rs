//! Backup, restore, and cleanup sequencing.
//!
//! Each step is one bridge invocation. A restore never starts unless the
//! preceding backup succeeded, and artifacts are removed only after every
//! restore has settled successfully.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Months, NaiveTime, Utc};
use dbvault_bridge::{EventBusObserver, OperationBridge};
use dbvault_config::PipelineConfig;
use dbvault_core::{OperationDescriptor, OperationKind, OperationOutcome, ProgressGranularity};
use dbvault_events::{Event, EventBus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Artifact file name for a backup of `database` taken at `at` (UTC).
#[must_use]
pub fn artifact_name(database: &str, kind: OperationKind, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%d-%H-%M-%S");
    match kind {
        OperationKind::IncrementalBackup => format!("{database}_{stamp}_diff.bak"),
        OperationKind::FullBackup | OperationKind::Restore => format!("{database}_{stamp}.bak"),
    }
}

/// Midnight UTC of the day `years` after `now`.
#[must_use]
pub fn expiration_after(now: DateTime<Utc>, years: u32) -> Option<DateTime<Utc>> {
    now.date_naive()
        .checked_add_months(Months::new(years.saturating_mul(12)))
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// Options for a single backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Take a differential backup instead of a full one.
    pub differential: bool,
    /// Artifact location; a timestamped name is generated when unset.
    pub location: Option<String>,
    /// Empty the transaction log once the backup completes.
    pub truncate_log: bool,
}

/// Options for a single restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Artifact to restore from.
    pub location: String,
    /// Overwrite an existing database.
    pub replace: bool,
    /// Leave the database waiting for a differential restore.
    pub no_recovery: bool,
    /// Proceed past checksum mismatches.
    pub continue_after_error: bool,
}

impl RestoreOptions {
    fn from_location(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            replace: false,
            no_recovery: false,
            continue_after_error: false,
        }
    }
}

/// Options for the full backup/restore/cleanup pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Add a differential backup and restore it on top of the full one.
    pub differential: bool,
    /// Leave artifacts in the backup directory.
    pub keep_artifacts: bool,
}

/// What a pipeline run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Artifact locations in the order they were written.
    pub artifacts: Vec<String>,
    /// Artifact files deleted after the restore.
    pub removed: Vec<PathBuf>,
}

/// Drives backup and restore operations for one database.
pub struct Pipeline {
    bridge: OperationBridge,
    events: EventBus,
    database: String,
    backup_dir: PathBuf,
    granularity: ProgressGranularity,
    expiration_years: u32,
}

impl Pipeline {
    /// Build a pipeline for the configured database.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the progress step is out of range.
    pub fn new(
        bridge: OperationBridge,
        events: EventBus,
        config: &PipelineConfig,
    ) -> AppResult<Self> {
        let granularity = config
            .progress_granularity()
            .map_err(|err| AppError::config("config.progress_granularity", err))?;
        Ok(Self {
            bridge,
            events,
            database: config.database.clone(),
            backup_dir: config.backup_dir.clone(),
            granularity,
            expiration_years: config.expiration_years,
        })
    }

    /// Database this pipeline acts on.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Filesystem path of an artifact location.
    #[must_use]
    pub fn artifact_path(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.backup_dir.join(path)
        }
    }

    /// Run one backup and return the artifact location it wrote.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::OperationFailed`] or [`AppError::Cancelled`] when
    /// the operation does not succeed.
    pub async fn backup(
        &self,
        options: BackupOptions,
        cancel: &CancellationToken,
    ) -> AppResult<String> {
        let now = Utc::now();
        let kind = if options.differential {
            OperationKind::IncrementalBackup
        } else {
            OperationKind::FullBackup
        };
        let location = options
            .location
            .unwrap_or_else(|| artifact_name(&self.database, kind, now));
        let descriptor =
            OperationDescriptor::builder(kind, self.database.as_str(), location.as_str())
                .expiration(expiration_after(now, self.expiration_years))
                .truncate_log_on_completion(options.truncate_log)
                .progress_granularity(self.granularity)
                .build()
                .map_err(|err| AppError::descriptor("descriptor.backup", err))?;

        self.execute(&descriptor, cancel).await?;
        let message = if options.differential {
            "Differential Backup complete."
        } else {
            "Full Backup complete."
        };
        info!(database = %self.database, location = %location, "{message}");
        Ok(location)
    }

    /// Run one restore.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::backup`].
    pub async fn restore(
        &self,
        options: RestoreOptions,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        self.restore_step(options, "Database Restore complete.", cancel)
            .await
    }

    /// Back up, restore, and remove the artifacts.
    ///
    /// # Errors
    ///
    /// Returns the first step error. Artifacts written before a failed
    /// restore are left in place.
    pub async fn run(
        &self,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> AppResult<PipelineReport> {
        let mut report = PipelineReport::default();
        let full = self
            .backup(
                BackupOptions {
                    differential: false,
                    location: None,
                    truncate_log: true,
                },
                cancel,
            )
            .await?;
        report.artifacts.push(full);

        if options.differential {
            let differential = self
                .backup(
                    BackupOptions {
                        differential: true,
                        location: None,
                        truncate_log: true,
                    },
                    cancel,
                )
                .await?;
            report.artifacts.push(differential);
        }

        if let Err(err) = self.restore_artifacts(&report.artifacts, cancel).await {
            warn!(
                artifacts = ?report.artifacts,
                "restore did not succeed; keeping backup artifacts"
            );
            return Err(err);
        }

        if options.keep_artifacts {
            info!(artifacts = ?report.artifacts, "keeping backup artifacts");
        } else {
            for location in &report.artifacts {
                if let Some(path) = self.remove_artifact(location)? {
                    report.removed.push(path);
                }
            }
        }
        Ok(report)
    }

    async fn restore_artifacts(
        &self,
        artifacts: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        match artifacts {
            [full] => {
                let options = RestoreOptions {
                    replace: true,
                    ..RestoreOptions::from_location(full.as_str())
                };
                self.restore_step(options, "Full Database Restore complete.", cancel)
                    .await
            }
            [full, differential, ..] => {
                let options = RestoreOptions {
                    replace: true,
                    no_recovery: true,
                    ..RestoreOptions::from_location(full.as_str())
                };
                self.restore_step(options, "Full Database Restore complete.", cancel)
                    .await?;
                self.restore_step(
                    RestoreOptions::from_location(differential.as_str()),
                    "Differential Database Restore complete.",
                    cancel,
                )
                .await
            }
            [] => Ok(()),
        }
    }

    async fn restore_step(
        &self,
        options: RestoreOptions,
        message: &'static str,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let descriptor =
            OperationDescriptor::restore(self.database.as_str(), options.location.as_str())
                .replace_existing(options.replace)
                .leave_in_recovery_pending(options.no_recovery)
                .continue_after_checksum_error(options.continue_after_error)
                .progress_granularity(self.granularity)
                .build()
                .map_err(|err| AppError::descriptor("descriptor.restore", err))?;

        self.execute(&descriptor, cancel).await?;
        info!(
            database = %self.database,
            location = %options.location,
            recovery = !options.no_recovery,
            "{message}"
        );
        Ok(())
    }

    async fn execute(
        &self,
        descriptor: &OperationDescriptor,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let observer = EventBusObserver::new(self.events.clone());
        match self.bridge.execute(descriptor, &observer, cancel).await {
            OperationOutcome::Succeeded => Ok(()),
            OperationOutcome::Cancelled => Err(AppError::Cancelled {
                kind: descriptor.kind(),
                target: descriptor.target_name().to_string(),
            }),
            failed => Err(AppError::OperationFailed {
                kind: descriptor.kind(),
                target: descriptor.target_name().to_string(),
                detail: failed.summary().detail.unwrap_or_default(),
            }),
        }
    }

    fn remove_artifact(&self, location: &str) -> AppResult<Option<PathBuf>> {
        let path = self.artifact_path(location);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "backup artifact removed");
                self.events.publish(Event::ArtifactRemoved {
                    path: path.display().to_string(),
                });
                Ok(Some(path))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "backup artifact already absent");
                Ok(None)
            }
            Err(source) => Err(AppError::Io {
                operation: "artifact.remove",
                path: Some(path),
                source,
            }),
        }
    }
}
