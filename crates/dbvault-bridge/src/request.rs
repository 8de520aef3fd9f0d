//! Engine-facing request types derived from operation descriptors.

use chrono::{DateTime, Utc};
use dbvault_core::{OperationDescriptor, OperationKind};
use uuid::Uuid;

/// Work item handed to an engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    /// Write a backup set for a database.
    Backup(BackupRequest),
    /// Restore a database from a backup set.
    Restore(RestoreRequest),
}

/// Parameters for a full or differential backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    /// Operation identifier carried through for correlation.
    pub operation_id: Uuid,
    /// Database to back up.
    pub database: String,
    /// Backup device (artifact path) as supplied by the caller.
    pub device: String,
    /// Only record changes since the last full backup.
    pub incremental: bool,
    /// Backup set name recorded in the artifact.
    pub backup_set_name: String,
    /// Backup set description recorded in the artifact.
    pub description: String,
    /// Point in time after which the backup set may be overwritten.
    pub expiration: Option<DateTime<Utc>>,
    /// Truncate the transaction log once the backup completes.
    pub truncate_log: bool,
    /// Keep going when the engine hits a checksum error.
    pub continue_after_error: bool,
    /// Percentage step between progress notifications.
    pub percent_notification: u8,
}

/// Parameters for a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Operation identifier carried through for correlation.
    pub operation_id: Uuid,
    /// Database to restore into.
    pub database: String,
    /// Backup device (artifact path) as supplied by the caller.
    pub device: String,
    /// Overwrite an existing database.
    pub replace: bool,
    /// Leave the database in the restoring state.
    pub no_recovery: bool,
    /// Proceed past checksum mismatches.
    pub continue_after_error: bool,
    /// Percentage step between progress notifications.
    pub percent_notification: u8,
}

impl OperationRequest {
    /// Database the request acts on.
    #[must_use]
    pub fn database(&self) -> &str {
        match self {
            Self::Backup(request) => &request.database,
            Self::Restore(request) => &request.database,
        }
    }

    /// Backup device the request reads or writes.
    #[must_use]
    pub fn device(&self) -> &str {
        match self {
            Self::Backup(request) => &request.device,
            Self::Restore(request) => &request.device,
        }
    }

    /// Percentage step between progress notifications.
    #[must_use]
    pub const fn percent_notification(&self) -> u8 {
        match self {
            Self::Backup(request) => request.percent_notification,
            Self::Restore(request) => request.percent_notification,
        }
    }

    /// Statement keyword used in engine messages.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Backup(_) => "BACKUP DATABASE",
            Self::Restore(_) => "RESTORE DATABASE",
        }
    }
}

impl From<&OperationDescriptor> for OperationRequest {
    fn from(descriptor: &OperationDescriptor) -> Self {
        let flags = descriptor.flags();
        let database = descriptor.target_name().to_string();
        let device = descriptor.location().to_string();
        let percent_notification = descriptor.progress_granularity().percent();

        match descriptor.kind() {
            OperationKind::FullBackup | OperationKind::IncrementalBackup => {
                let incremental = descriptor.kind() == OperationKind::IncrementalBackup;
                let description = if incremental {
                    format!("Differential backup of {database}")
                } else {
                    format!("Full backup of {database}")
                };
                Self::Backup(BackupRequest {
                    operation_id: descriptor.id(),
                    backup_set_name: format!("{database} Backup"),
                    description,
                    database,
                    device,
                    incremental,
                    expiration: flags.expiration,
                    truncate_log: flags.truncate_log_on_completion,
                    continue_after_error: flags.continue_after_checksum_error,
                    percent_notification,
                })
            }
            OperationKind::Restore => Self::Restore(RestoreRequest {
                operation_id: descriptor.id(),
                database,
                device,
                replace: flags.replace_existing,
                no_recovery: flags.leave_in_recovery_pending,
                continue_after_error: flags.continue_after_checksum_error,
                percent_notification,
            }),
        }
    }
}
