//! # Design
//!
//! - Centralize driver errors for configuration, bootstrap, and operations.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Map every variant onto a process exit code in one place.

use std::error::Error as _;
use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;

use dbvault_config::ConfigError;
use dbvault_core::{DescriptorError, OperationKind};
use dbvault_telemetry::TelemetryError;
use thiserror::Error;

/// Result alias for driver operations.
pub type AppResult<T> = Result<T, AppError>;

/// Exit code for configuration and descriptor errors.
pub const EXIT_INVALID: i32 = 2;
/// Exit code for failed operations and runtime errors.
pub const EXIT_FAILURE: i32 = 3;
/// Exit code for cancelled operations (128 + SIGINT).
pub const EXIT_CANCELLED: i32 = 130;

/// Driver-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ConfigError,
    },
    /// An operation descriptor was rejected before reaching the engine.
    #[error("invalid operation descriptor")]
    Descriptor {
        /// Operation identifier.
        operation: &'static str,
        /// Source descriptor error.
        source: DescriptorError,
    },
    /// Telemetry setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: TelemetryError,
    },
    /// A bridge invocation settled with either failure classification.
    #[error("operation failed")]
    OperationFailed {
        /// Operation kind.
        kind: OperationKind,
        /// Database acted on.
        target: String,
        /// Classified reason or rendered failure chain.
        detail: String,
    },
    /// A bridge invocation was cancelled.
    #[error("operation cancelled")]
    Cancelled {
        /// Operation kind.
        kind: OperationKind,
        /// Database acted on.
        target: String,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn descriptor(operation: &'static str, source: DescriptorError) -> Self {
        Self::Descriptor { operation, source }
    }

    pub(crate) const fn telemetry(operation: &'static str, source: TelemetryError) -> Self {
        Self::Telemetry { operation, source }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::Descriptor { .. } => EXIT_INVALID,
            Self::Cancelled { .. } => EXIT_CANCELLED,
            Self::Telemetry { .. } | Self::OperationFailed { .. } | Self::Io { .. } => {
                EXIT_FAILURE
            }
        }
    }

    /// Human-readable message including context fields and the source chain.
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::Config {
                source:
                    ConfigError::InvalidField {
                        field,
                        value,
                        reason,
                    },
                ..
            } => match value {
                Some(value) => {
                    format!("invalid configuration field '{field}' ('{value}'): {reason}")
                }
                None => format!("invalid configuration field '{field}': {reason}"),
            },
            Self::Descriptor {
                source: DescriptorError::InvalidDescriptor { field, reason },
                ..
            } => format!("invalid operation descriptor field '{field}': {reason}"),
            Self::OperationFailed {
                kind,
                target,
                detail,
            } => format!("{kind} of '{target}' failed: {detail}"),
            Self::Cancelled { kind, target } => format!("{kind} of '{target}' was cancelled"),
            other => render_chain(other),
        }
    }
}

fn render_chain(error: &AppError) -> String {
    let mut rendered = error.to_string();
    if let AppError::Io {
        path: Some(path), ..
    } = error
    {
        let _ = write!(rendered, " ({})", path.display());
    }
    let mut current = error.source();
    while let Some(source) = current {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        current = source.source();
    }
    rendered
}
