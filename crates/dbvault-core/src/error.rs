//! Error types for operation descriptors and engine operations.

use std::error::Error;

use thiserror::Error;

/// Errors raised while building an operation descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// The descriptor is structurally malformed and must not reach the engine.
    #[error("invalid operation descriptor")]
    InvalidDescriptor {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason describing the failure.
        reason: &'static str,
    },
}

/// Convenience alias for descriptor construction results.
pub type DescriptorResult<T> = Result<T, DescriptorError>;

/// Failure that could not be matched against a known fatal message.
#[derive(Debug, Error)]
pub enum OperationFailure {
    /// The engine rejected the operation before it started running.
    #[error("engine rejected the operation")]
    SubmissionFailed {
        /// Setup step that failed (`open_session`, `submit`).
        operation: &'static str,
        /// Underlying engine error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The engine completion event carried an error.
    #[error("engine reported a failure")]
    EngineReported {
        /// Error attached to the completion event.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The engine dropped its event sink without emitting a completion event.
    #[error("engine event stream closed before completion")]
    EventStreamClosed,
}

impl OperationFailure {
    /// Build a submission failure from any error.
    #[must_use]
    pub fn submission(
        operation: &'static str,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::SubmissionFailed {
            operation,
            source: source.into(),
        }
    }

    /// Render the failure together with its source chain.
    #[must_use]
    pub fn detail(&self) -> String {
        let mut rendered = self.to_string();
        let mut current = self.source();
        while let Some(source) = current {
            rendered.push_str(": ");
            rendered.push_str(&source.to_string());
            current = source.source();
        }
        rendered
    }
}
