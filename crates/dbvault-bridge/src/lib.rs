#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Async operation bridge between backup/restore drivers and an engine.
//!
//! [`OperationBridge::execute`] turns one [`OperationDescriptor`] into exactly
//! one [`OperationOutcome`]. Engine events are funnelled through a
//! per-invocation channel and handled one at a time, informational messages
//! are classified against a [`MessageClassifier`], and the engine session is
//! released on every exit path before the outcome is returned.

/// Engine errors raised by the bundled engines.
pub mod error;
/// Event-bus observer adapter.
pub mod observer;
/// Engine request translation.
pub mod request;
/// Engine collaborator contract and bundled engines.
pub mod session;
mod worker;

use std::sync::Arc;

use dbvault_core::{MessageClassifier, OperationDescriptor, OperationObserver, OperationOutcome};
use dbvault_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

pub use error::EngineError;
pub use observer::EventBusObserver;
pub use request::{BackupRequest, OperationRequest, RestoreRequest};
pub use session::file::{ArtifactHeader, ArtifactKind, FileEngine, read_artifact_header};
pub use session::scripted::{ScriptStep, ScriptedEngine};
pub use session::{BackupEngine, EngineEventSink, EngineSession};

/// Runs backup and restore operations against a [`BackupEngine`].
#[derive(Clone)]
pub struct OperationBridge {
    engine: Arc<dyn BackupEngine>,
    classifier: MessageClassifier,
    metrics: Option<Metrics>,
}

impl OperationBridge {
    /// Bridge over `engine` using the default fatal-message classifier.
    #[must_use]
    pub fn new(engine: Arc<dyn BackupEngine>) -> Self {
        Self {
            engine,
            classifier: MessageClassifier::default(),
            metrics: None,
        }
    }

    /// Replace the informational-message classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: MessageClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Record outcomes and event counts in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Classifier applied to informational messages.
    #[must_use]
    pub const fn classifier(&self) -> &MessageClassifier {
        &self.classifier
    }

    /// Run one operation to settlement.
    ///
    /// Never fails: every error path is reported as an [`OperationOutcome`].
    /// The observer sees progress in arrival order and exactly one
    /// `on_outcome` call. Cancelling `cancel` before the engine is contacted
    /// settles [`OperationOutcome::Cancelled`] without opening a session.
    pub async fn execute(
        &self,
        descriptor: &OperationDescriptor,
        observer: &dyn OperationObserver,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        let span = info_span!(
            "operation",
            operation_id = %descriptor.id(),
            kind = %descriptor.kind(),
            target = %descriptor.target_name(),
        );
        let invocation = worker::Invocation {
            engine: self.engine.as_ref(),
            classifier: &self.classifier,
            metrics: self.metrics.as_ref(),
            descriptor,
            observer,
        };
        worker::run(invocation, cancel).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use dbvault_core::NoopObserver;

    #[tokio::test]
    async fn bridge_records_metrics_per_outcome() -> Result<()> {
        let metrics = Metrics::new()?;
        let engine = ScriptedEngine::new(ScriptStep::successful_run(50));
        let bridge = OperationBridge::new(Arc::new(engine.clone())).with_metrics(metrics.clone());
        let descriptor = OperationDescriptor::full_backup("Northwind", "northwind.bak").build()?;

        let outcome = bridge
            .execute(&descriptor, &NoopObserver, &CancellationToken::new())
            .await;
        assert!(outcome.is_success());
        assert_eq!(metrics.operations("full_backup", "succeeded"), 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_operations, 0);
        assert_eq!(snapshot.progress_events_total, 2);
        assert_eq!(engine.releases(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn custom_classifier_patterns_are_applied() -> Result<()> {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::info("Msg 3201: media is write-protected"),
            ScriptStep::Complete,
        ]);
        let bridge = OperationBridge::new(Arc::new(engine))
            .with_classifier(MessageClassifier::default().with_pattern("write-protected"));
        assert_eq!(bridge.classifier().patterns().len(), 3);

        let descriptor = OperationDescriptor::full_backup("Northwind", "northwind.bak").build()?;
        let outcome = bridge
            .execute(&descriptor, &NoopObserver, &CancellationToken::new())
            .await;
        match outcome {
            OperationOutcome::FailedClassified { reason } => {
                assert_eq!(reason, "Msg 3201: media is write-protected");
            }
            other => anyhow::bail!("expected classified failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn release_failures_are_counted_not_propagated() -> Result<()> {
        let metrics = Metrics::new()?;
        let engine =
            ScriptedEngine::new(vec![ScriptStep::Complete]).failing_release("connection reset");
        let bridge = OperationBridge::new(Arc::new(engine)).with_metrics(metrics.clone());
        let descriptor = OperationDescriptor::restore("Northwind", "northwind.bak").build()?;

        let outcome = bridge
            .execute(&descriptor, &NoopObserver, &CancellationToken::new())
            .await;
        assert!(outcome.is_success());
        assert_eq!(metrics.snapshot().session_release_failures_total, 1);
        Ok(())
    }
}
