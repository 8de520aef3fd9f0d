//! Observer adapter that republishes operation notifications on the event bus.

use dbvault_core::{MessageClass, OperationDescriptor, OperationObserver, OperationOutcome};
use dbvault_events::{Event, EventBus};

/// Publishes every notification as a [`dbvault_events::Event`].
#[derive(Clone)]
pub struct EventBusObserver {
    events: EventBus,
}

impl EventBusObserver {
    /// Wrap the shared event bus.
    #[must_use]
    pub const fn new(events: EventBus) -> Self {
        Self { events }
    }
}

impl OperationObserver for EventBusObserver {
    fn on_submitted(&self, descriptor: &OperationDescriptor) {
        self.events.publish(Event::OperationSubmitted {
            operation_id: descriptor.id(),
            kind: descriptor.kind().as_str().to_string(),
            target: descriptor.target_name().to_string(),
            location: descriptor.location().to_string(),
        });
    }

    fn on_progress(&self, descriptor: &OperationDescriptor, percent: u8) {
        self.events.publish(Event::Progress {
            operation_id: descriptor.id(),
            percent,
        });
    }

    fn on_informational(&self, descriptor: &OperationDescriptor, message: &str, class: &MessageClass) {
        self.events.publish(Event::Informational {
            operation_id: descriptor.id(),
            message: message.to_string(),
            fatal: class.is_fatal(),
        });
    }

    fn on_outcome(&self, descriptor: &OperationDescriptor, outcome: &OperationOutcome) {
        let summary = outcome.summary();
        self.events.publish(Event::OperationSettled {
            operation_id: descriptor.id(),
            kind: descriptor.kind().as_str().to_string(),
            target: descriptor.target_name().to_string(),
            status: summary.status,
            detail: summary.detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tokio::time::{Duration, timeout};

    #[tokio::test]
    async fn notifications_become_bus_events() -> Result<()> {
        let bus = EventBus::with_capacity(8);
        let mut stream = bus.subscribe(None);
        let observer = EventBusObserver::new(bus.clone());
        let descriptor = OperationDescriptor::restore("Northwind", "northwind.bak").build()?;

        observer.on_submitted(&descriptor);
        observer.on_progress(&descriptor, 40);
        observer.on_informational(
            &descriptor,
            "RESTORE DATABASE is terminating abnormally.",
            &MessageClass::Fatal {
                phrase: "terminating abnormally".to_string(),
            },
        );
        observer.on_outcome(
            &descriptor,
            &OperationOutcome::FailedClassified {
                reason: "RESTORE DATABASE is terminating abnormally.".to_string(),
            },
        );

        let mut kinds = Vec::new();
        for _ in 0..4 {
            let envelope = timeout(Duration::from_secs(1), stream.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("event stream closed"))?;
            assert_eq!(envelope.event.operation_id(), Some(descriptor.id()));
            match &envelope.event {
                Event::Informational { fatal, .. } => assert!(fatal),
                Event::OperationSettled { status, detail, .. } => {
                    assert_eq!(status, "failed_classified");
                    assert_eq!(
                        detail.as_deref(),
                        Some("RESTORE DATABASE is terminating abnormally.")
                    );
                }
                _ => {}
            }
            kinds.push(envelope.event.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "operation_submitted",
                "progress",
                "informational",
                "operation_settled"
            ]
        );
        Ok(())
    }
}
