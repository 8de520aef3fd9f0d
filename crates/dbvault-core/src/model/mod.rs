//! Operation descriptors, outcomes, and engine events shared across the workspace.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DescriptorError, DescriptorResult, OperationFailure};

/// Kind of engine operation a descriptor requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Full database backup.
    FullBackup,
    /// Differential backup relative to the last full backup.
    IncrementalBackup,
    /// Restore from a previously written artifact.
    Restore,
}

impl OperationKind {
    /// Machine-friendly discriminator used in logs, metrics, and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullBackup => "full_backup",
            Self::IncrementalBackup => "incremental_backup",
            Self::Restore => "restore",
        }
    }

    /// Whether the operation writes a new artifact.
    #[must_use]
    pub const fn is_backup(self) -> bool {
        matches!(self, Self::FullBackup | Self::IncrementalBackup)
    }
}

impl Display for OperationKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Operation-specific switches passed through to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFlags {
    /// Overwrite an existing database on restore.
    pub replace_existing: bool,
    /// Keep going when the artifact checksum does not verify.
    pub continue_after_checksum_error: bool,
    /// Truncate the transaction log once a backup completes.
    pub truncate_log_on_completion: bool,
    /// Point in time after which the backup set may be overwritten.
    pub expiration: Option<DateTime<Utc>>,
    /// Leave the restored database in the restoring state (no recovery).
    pub leave_in_recovery_pending: bool,
}

/// Minimum percentage delta between two progress notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ProgressGranularity(u8);

impl ProgressGranularity {
    /// Notification step used when none is configured.
    pub const DEFAULT_PERCENT: u8 = 10;

    /// Validate a granularity in the `(0, 100]` range.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::InvalidDescriptor`] when `percent` is zero or above 100.
    pub const fn new(percent: u8) -> DescriptorResult<Self> {
        if percent == 0 || percent > 100 {
            return Err(DescriptorError::InvalidDescriptor {
                field: "progress_granularity_percent",
                reason: "must be between 1 and 100",
            });
        }
        Ok(Self(percent))
    }

    /// Step size in percent.
    #[must_use]
    pub const fn percent(self) -> u8 {
        self.0
    }
}

impl Default for ProgressGranularity {
    fn default() -> Self {
        Self(Self::DEFAULT_PERCENT)
    }
}

impl TryFrom<u8> for ProgressGranularity {
    type Error = DescriptorError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProgressGranularity> for u8 {
    fn from(value: ProgressGranularity) -> Self {
        value.0
    }
}

/// Immutable configuration for a single engine operation.
///
/// Descriptors can only be produced by [`OperationDescriptorBuilder::build`], so
/// every instance handed to the bridge has passed structural validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDescriptor {
    id: Uuid,
    kind: OperationKind,
    target_name: String,
    location: String,
    flags: OperationFlags,
    progress_granularity: ProgressGranularity,
}

impl OperationDescriptor {
    /// Start building a descriptor for the given operation.
    #[must_use]
    pub fn builder(
        kind: OperationKind,
        target_name: impl Into<String>,
        location: impl Into<String>,
    ) -> OperationDescriptorBuilder {
        OperationDescriptorBuilder {
            kind,
            target_name: target_name.into(),
            location: location.into(),
            flags: OperationFlags::default(),
            progress_granularity: ProgressGranularity::default(),
        }
    }

    /// Builder for a full backup of `target_name` into `location`.
    #[must_use]
    pub fn full_backup(
        target_name: impl Into<String>,
        location: impl Into<String>,
    ) -> OperationDescriptorBuilder {
        Self::builder(OperationKind::FullBackup, target_name, location)
    }

    /// Builder for a differential backup of `target_name` into `location`.
    #[must_use]
    pub fn incremental_backup(
        target_name: impl Into<String>,
        location: impl Into<String>,
    ) -> OperationDescriptorBuilder {
        Self::builder(OperationKind::IncrementalBackup, target_name, location)
    }

    /// Builder for a restore of `target_name` from `location`.
    #[must_use]
    pub fn restore(
        target_name: impl Into<String>,
        location: impl Into<String>,
    ) -> OperationDescriptorBuilder {
        Self::builder(OperationKind::Restore, target_name, location)
    }

    /// Identifier used to correlate logs and events for this operation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Requested operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Database the operation acts on.
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Artifact path or URI, passed to the engine untouched.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Operation switches.
    #[must_use]
    pub const fn flags(&self) -> &OperationFlags {
        &self.flags
    }

    /// Progress notification step.
    #[must_use]
    pub const fn progress_granularity(&self) -> ProgressGranularity {
        self.progress_granularity
    }
}

/// Builder collecting descriptor fields before validation.
#[derive(Debug, Clone)]
#[must_use]
pub struct OperationDescriptorBuilder {
    kind: OperationKind,
    target_name: String,
    location: String,
    flags: OperationFlags,
    progress_granularity: ProgressGranularity,
}

impl OperationDescriptorBuilder {
    /// Replace all flags at once.
    pub fn flags(mut self, flags: OperationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Overwrite an existing database on restore.
    pub fn replace_existing(mut self, enabled: bool) -> Self {
        self.flags.replace_existing = enabled;
        self
    }

    /// Continue past checksum errors.
    pub fn continue_after_checksum_error(mut self, enabled: bool) -> Self {
        self.flags.continue_after_checksum_error = enabled;
        self
    }

    /// Truncate the transaction log after the backup.
    pub fn truncate_log_on_completion(mut self, enabled: bool) -> Self {
        self.flags.truncate_log_on_completion = enabled;
        self
    }

    /// Set or clear the backup set expiration.
    pub fn expiration(mut self, expiration: Option<DateTime<Utc>>) -> Self {
        self.flags.expiration = expiration;
        self
    }

    /// Leave the database restoring so further differential restores can follow.
    pub fn leave_in_recovery_pending(mut self, enabled: bool) -> Self {
        self.flags.leave_in_recovery_pending = enabled;
        self
    }

    /// Set the progress notification step.
    pub fn progress_granularity(mut self, granularity: ProgressGranularity) -> Self {
        self.progress_granularity = granularity;
        self
    }

    /// Validate the collected fields and freeze them into a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::InvalidDescriptor`] when the target name or
    /// location is empty.
    pub fn build(self) -> DescriptorResult<OperationDescriptor> {
        if self.target_name.trim().is_empty() {
            return Err(DescriptorError::InvalidDescriptor {
                field: "target_name",
                reason: "must not be empty",
            });
        }
        if self.location.trim().is_empty() {
            return Err(DescriptorError::InvalidDescriptor {
                field: "location",
                reason: "must not be empty",
            });
        }

        Ok(OperationDescriptor {
            id: Uuid::new_v4(),
            kind: self.kind,
            target_name: self.target_name,
            location: self.location,
            flags: self.flags,
            progress_granularity: self.progress_granularity,
        })
    }
}

/// Lifecycle of one bridge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Descriptor accepted, nothing sent to the engine yet.
    Idle,
    /// Request handed to the engine's asynchronous entry point.
    Submitted,
    /// Engine accepted the request and is emitting events.
    Running,
    /// A terminal signal arrived; the session is being released.
    Settling,
    /// Outcome committed; later events are ignored.
    Settled,
}

impl OperationState {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Settling => "settling",
            Self::Settled => "settled",
        }
    }
}

impl Display for OperationState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Event delivered by the engine while an operation runs.
#[derive(Debug)]
pub enum EngineEvent {
    /// Percentage of work completed.
    Progress {
        /// Completion percentage reported by the engine.
        percent: u8,
    },
    /// Free-text informational message.
    Informational {
        /// Message text as emitted by the engine.
        message: String,
    },
    /// The engine finished the operation, with an error when it failed.
    Completed {
        /// Error attached to the completion event.
        error: Option<Box<dyn Error + Send + Sync>>,
    },
}

impl EngineEvent {
    /// Machine-friendly discriminator used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Informational { .. } => "informational",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Terminal result of one bridge invocation.
#[derive(Debug)]
pub enum OperationOutcome {
    /// The engine completed without error.
    Succeeded,
    /// An informational message matched a known fatal phrase.
    FailedClassified {
        /// The informational message that matched.
        reason: String,
    },
    /// The operation failed for a reason outside the fatal phrase list.
    FailedUnclassified {
        /// Underlying failure.
        cause: OperationFailure,
    },
    /// The caller cancelled the operation before it settled.
    Cancelled,
}

impl OperationOutcome {
    /// Whether the engine completed cleanly.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Whether the operation failed, regardless of classification.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FailedClassified { .. } | Self::FailedUnclassified { .. }
        )
    }

    /// Machine-friendly discriminator used in logs, metrics, and events.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::FailedClassified { .. } => "failed_classified",
            Self::FailedUnclassified { .. } => "failed_unclassified",
            Self::Cancelled => "cancelled",
        }
    }

    /// Serialisable projection of the outcome.
    #[must_use]
    pub fn summary(&self) -> OutcomeSummary {
        let detail = match self {
            Self::Succeeded | Self::Cancelled => None,
            Self::FailedClassified { reason } => Some(reason.clone()),
            Self::FailedUnclassified { cause } => Some(cause.detail()),
        };
        OutcomeSummary {
            status: self.label().to_string(),
            detail,
        }
    }
}

impl Display for OperationOutcome {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => formatter.write_str("succeeded"),
            Self::FailedClassified { reason } => write!(formatter, "failed: {reason}"),
            Self::FailedUnclassified { cause } => write!(formatter, "failed: {}", cause.detail()),
            Self::Cancelled => formatter.write_str("cancelled"),
        }
    }
}

/// Outcome projection safe to clone, serialise, and publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    /// Outcome label (see [`OperationOutcome::label`]).
    pub status: String,
    /// Failure detail when the operation failed.
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io;

    #[test]
    fn builder_rejects_empty_target_and_location() {
        let err = OperationDescriptor::full_backup("  ", "northwind.bak")
            .build()
            .expect_err("blank target should be rejected");
        assert_eq!(
            err,
            DescriptorError::InvalidDescriptor {
                field: "target_name",
                reason: "must not be empty",
            }
        );

        let err = OperationDescriptor::restore("Northwind", "")
            .build()
            .expect_err("empty location should be rejected");
        assert!(matches!(
            err,
            DescriptorError::InvalidDescriptor {
                field: "location",
                ..
            }
        ));
    }

    #[test]
    fn restore_without_replace_is_structurally_valid() -> Result<()> {
        let descriptor = OperationDescriptor::restore("Northwind", "northwind.bak").build()?;
        assert!(!descriptor.flags().replace_existing);
        assert_eq!(descriptor.kind(), OperationKind::Restore);
        Ok(())
    }

    #[test]
    fn builder_applies_flags_and_granularity() -> Result<()> {
        let expiry = Utc::now();
        let descriptor = OperationDescriptor::full_backup("Northwind", "northwind.bak")
            .truncate_log_on_completion(true)
            .continue_after_checksum_error(true)
            .expiration(Some(expiry))
            .progress_granularity(ProgressGranularity::new(25)?)
            .build()?;

        assert!(descriptor.flags().truncate_log_on_completion);
        assert!(descriptor.flags().continue_after_checksum_error);
        assert_eq!(descriptor.flags().expiration, Some(expiry));
        assert_eq!(descriptor.progress_granularity().percent(), 25);
        assert_eq!(descriptor.target_name(), "Northwind");
        assert_eq!(descriptor.location(), "northwind.bak");
        Ok(())
    }

    #[test]
    fn descriptors_get_distinct_ids() -> Result<()> {
        let first = OperationDescriptor::full_backup("Northwind", "a.bak").build()?;
        let second = OperationDescriptor::full_backup("Northwind", "a.bak").build()?;
        assert_ne!(first.id(), second.id());
        Ok(())
    }

    #[test]
    fn granularity_bounds() {
        assert!(ProgressGranularity::new(0).is_err());
        assert!(ProgressGranularity::new(101).is_err());
        assert_eq!(ProgressGranularity::new(1).map(u8::from), Ok(1));
        assert_eq!(ProgressGranularity::new(100).map(u8::from), Ok(100));
        assert_eq!(ProgressGranularity::default().percent(), 10);
    }

    #[test]
    fn granularity_deserialization_validates() {
        let parsed: Result<ProgressGranularity, _> = serde_json::from_str("5");
        assert!(matches!(parsed, Ok(value) if value.percent() == 5));
        let rejected: Result<ProgressGranularity, _> = serde_json::from_str("0");
        assert!(rejected.is_err());
    }

    #[test]
    fn outcome_labels_and_failure_flags() {
        let classified = OperationOutcome::FailedClassified {
            reason: "Cannot open backup device 'x'".to_string(),
        };
        let unclassified = OperationOutcome::FailedUnclassified {
            cause: OperationFailure::EngineReported {
                source: Box::new(io::Error::other("disk full")),
            },
        };

        assert!(OperationOutcome::Succeeded.is_success());
        assert!(classified.is_failure());
        assert!(unclassified.is_failure());
        assert!(!OperationOutcome::Cancelled.is_failure());
        assert!(!OperationOutcome::Cancelled.is_success());
        assert_eq!(classified.label(), "failed_classified");
        assert_eq!(unclassified.label(), "failed_unclassified");
    }

    #[test]
    fn summary_carries_failure_detail() {
        let unclassified = OperationOutcome::FailedUnclassified {
            cause: OperationFailure::EngineReported {
                source: Box::new(io::Error::other("disk full")),
            },
        };
        let summary = unclassified.summary();
        assert_eq!(summary.status, "failed_unclassified");
        assert_eq!(
            summary.detail.as_deref(),
            Some("engine reported a failure: disk full")
        );
        assert_eq!(OperationOutcome::Succeeded.summary().detail, None);
        assert_eq!(unclassified.to_string(), "failed: engine reported a failure: disk full");
    }

    #[test]
    fn kind_helpers() {
        assert!(OperationKind::FullBackup.is_backup());
        assert!(OperationKind::IncrementalBackup.is_backup());
        assert!(!OperationKind::Restore.is_backup());
        assert_eq!(OperationKind::IncrementalBackup.to_string(), "incremental_backup");
    }
}
