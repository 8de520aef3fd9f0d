#![allow(clippy::redundant_pub_crate)]

use dbvault_core::{
    EngineEvent, MessageClass, MessageClassifier, OperationDescriptor, OperationFailure,
    OperationObserver, OperationOutcome, OperationState,
};
use dbvault_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::request::OperationRequest;
use crate::session::{BackupEngine, EngineEventSink, SessionLease};

/// Collaborators for one bridge invocation.
pub(crate) struct Invocation<'a> {
    pub(crate) engine: &'a dyn BackupEngine,
    pub(crate) classifier: &'a MessageClassifier,
    pub(crate) metrics: Option<&'a Metrics>,
    pub(crate) descriptor: &'a OperationDescriptor,
    pub(crate) observer: &'a dyn OperationObserver,
}

/// Drive one operation from submission to settlement.
///
/// The outcome is returned only after the engine session, if one was
/// acquired, has been released.
pub(crate) async fn run(invocation: Invocation<'_>, cancel: &CancellationToken) -> OperationOutcome {
    let kind = invocation.descriptor.kind();
    if let Some(metrics) = invocation.metrics {
        metrics.operation_started();
    }

    let mut worker = Worker::new(invocation);
    worker.drive(cancel).await;
    let outcome = worker.commit();

    if let Some(metrics) = worker.invocation.metrics {
        metrics.operation_settled(kind.as_str(), outcome.label());
    }
    let summary = outcome.summary();
    if outcome.is_failure() {
        warn!(
            outcome = outcome.label(),
            detail = summary.detail.as_deref().unwrap_or_default(),
            "operation settled"
        );
    } else {
        info!(outcome = outcome.label(), "operation settled");
    }
    worker
        .invocation
        .observer
        .on_outcome(worker.invocation.descriptor, &outcome);
    outcome
}

/// First-writer-wins holder for the operation outcome.
#[derive(Default)]
struct Settlement {
    outcome: Option<OperationOutcome>,
}

impl Settlement {
    fn settle(&mut self, outcome: OperationOutcome) -> bool {
        if let Some(existing) = &self.outcome {
            debug!(
                settled = existing.label(),
                ignored = outcome.label(),
                "operation already settled"
            );
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    const fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    fn take(&mut self) -> Option<OperationOutcome> {
        self.outcome.take()
    }
}

struct Worker<'a> {
    invocation: Invocation<'a>,
    state: OperationState,
    settlement: Settlement,
    relaying: bool,
}

impl<'a> Worker<'a> {
    fn new(invocation: Invocation<'a>) -> Self {
        Self {
            invocation,
            state: OperationState::Idle,
            settlement: Settlement::default(),
            relaying: true,
        }
    }

    async fn drive(&mut self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            info!("operation cancelled before submission");
            self.settlement.settle(OperationOutcome::Cancelled);
            return;
        }

        let engine = self.invocation.engine;
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("operation cancelled while opening the engine session");
                self.settlement.settle(OperationOutcome::Cancelled);
                return;
            }
            opened = engine.open_session() => opened,
        };
        let session = match opened {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "failed to open engine session");
                self.settlement
                    .settle(OperationOutcome::FailedUnclassified {
                        cause: OperationFailure::submission("open_session", err),
                    });
                return;
            }
        };

        let mut lease = SessionLease::new(session, self.invocation.descriptor.id());
        self.run_on(&mut lease, cancel).await;

        self.transition(OperationState::Settling);
        match lease.release().await {
            Ok(()) => debug!("engine session released"),
            Err(err) => {
                warn!(error = %err, "failed to release engine session");
                if let Some(metrics) = self.invocation.metrics {
                    metrics.inc_release_failure();
                }
            }
        }
    }

    async fn run_on(&mut self, lease: &mut SessionLease, cancel: &CancellationToken) {
        let request = OperationRequest::from(self.invocation.descriptor);
        let (sink, mut events) = EngineEventSink::channel();

        // The session is held but nothing has reached the engine yet.
        if cancel.is_cancelled() {
            info!("operation cancelled before submission");
            self.settlement.settle(OperationOutcome::Cancelled);
            return;
        }

        self.transition(OperationState::Submitted);
        if let Err(err) = lease.submit(request, sink).await {
            warn!(error = %err, "engine rejected the operation");
            self.settlement
                .settle(OperationOutcome::FailedUnclassified {
                    cause: OperationFailure::submission("submit", err),
                });
            return;
        }
        self.invocation
            .observer
            .on_submitted(self.invocation.descriptor);
        self.transition(OperationState::Running);

        let mut cancel_requested = false;
        while !self.settlement.is_settled() {
            tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancel_requested => {
                    cancel_requested = true;
                    // Events the engine emitted before the request still count.
                    while !self.settlement.is_settled() {
                        let Ok(event) = events.try_recv() else { break };
                        self.handle_event(event);
                    }
                    if !self.settlement.is_settled() {
                        self.handle_cancel(lease).await;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("engine event stream closed before completion");
                        self.settlement.settle(OperationOutcome::FailedUnclassified {
                            cause: OperationFailure::EventStreamClosed,
                        });
                    }
                },
            }
        }

        drain(&mut events);
    }

    async fn handle_cancel(&mut self, lease: &mut SessionLease) {
        match lease.abort().await {
            Ok(true) => {
                info!("engine stopped the operation on request");
                self.settlement.settle(OperationOutcome::Cancelled);
            }
            Ok(false) => {
                info!("engine cannot stop the operation; waiting for it to finish");
                self.relaying = false;
            }
            Err(err) => {
                warn!(error = %err, "engine failed to stop the operation; waiting for it to finish");
                self.relaying = false;
            }
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        let Invocation {
            classifier,
            metrics,
            descriptor,
            observer,
            ..
        } = self.invocation;

        match event {
            EngineEvent::Progress { percent } => {
                if !self.relaying {
                    debug!(percent, "progress suppressed after cancellation");
                    return;
                }
                debug!(percent, "operation progress");
                if let Some(metrics) = metrics {
                    metrics.inc_progress();
                }
                observer.on_progress(descriptor, percent);
            }
            EngineEvent::Informational { message } => {
                let class = classifier.classify(&message);
                if let Some(metrics) = metrics {
                    metrics.inc_informational(class.label());
                }
                if self.relaying {
                    observer.on_informational(descriptor, &message, &class);
                }
                match class {
                    MessageClass::Fatal { phrase } => {
                        warn!(message = %message, phrase = %phrase, "engine reported a fatal condition");
                        self.settlement
                            .settle(OperationOutcome::FailedClassified { reason: message });
                    }
                    MessageClass::Benign => info!(message = %message, "engine message"),
                }
            }
            EngineEvent::Completed { error: None } => {
                self.settlement.settle(OperationOutcome::Succeeded);
            }
            EngineEvent::Completed {
                error: Some(source),
            } => {
                warn!(error = %source, "engine completed with an error");
                self.settlement.settle(OperationOutcome::FailedUnclassified {
                    cause: OperationFailure::EngineReported { source },
                });
            }
        }
    }

    fn transition(&mut self, next: OperationState) {
        debug!(from = %self.state, to = %next, "operation state changed");
        self.state = next;
    }

    fn commit(&mut self) -> OperationOutcome {
        self.transition(OperationState::Settled);
        self.settlement
            .take()
            .unwrap_or_else(|| OperationOutcome::FailedUnclassified {
                cause: OperationFailure::EventStreamClosed,
            })
    }
}

/// Discard events the engine queued after settlement.
fn drain(events: &mut mpsc::UnboundedReceiver<EngineEvent>) {
    events.close();
    let mut discarded = 0_usize;
    while let Ok(event) = events.try_recv() {
        discarded += 1;
        debug!(event = event.kind(), "discarding engine event after settlement");
    }
    if discarded > 0 {
        debug!(discarded, "late engine events dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_keeps_first_outcome() {
        let mut settlement = Settlement::default();
        assert!(!settlement.is_settled());
        assert!(settlement.settle(OperationOutcome::FailedClassified {
            reason: "Cannot open backup device 'x'".to_string(),
        }));
        assert!(!settlement.settle(OperationOutcome::Succeeded));
        assert!(settlement.is_settled());
        assert!(matches!(
            settlement.take(),
            Some(OperationOutcome::FailedClassified { .. })
        ));
        assert!(settlement.take().is_none());
    }

    #[tokio::test]
    async fn drain_discards_queued_events() {
        let (sink, mut receiver) = EngineEventSink::channel();
        assert!(sink.progress(10));
        assert!(sink.completed(None));
        drain(&mut receiver);
        assert!(!sink.progress(20));
        assert!(receiver.recv().await.is_none());
    }
}
