//! Observer that records every notification for later assertions.

use std::sync::{Mutex, PoisonError};

use dbvault_core::{MessageClass, OperationDescriptor, OperationObserver, OperationOutcome};

/// One notification seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The engine accepted the request.
    Submitted,
    /// A progress event was relayed.
    Progress(u8),
    /// An informational message was relayed.
    Informational {
        /// Message text.
        message: String,
        /// Whether the classifier marked it fatal.
        fatal: bool,
    },
    /// The operation settled with the given outcome label.
    Outcome(String),
}

/// Thread-safe observer that keeps notifications in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingObserver {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, notification: Notification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }

    /// Every notification so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Relayed progress percentages in order.
    #[must_use]
    pub fn progress(&self) -> Vec<u8> {
        self.notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Progress(percent) => Some(percent),
                _ => None,
            })
            .collect()
    }

    /// Relayed informational messages in order.
    #[must_use]
    pub fn informational(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Informational { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Outcome labels delivered through `on_outcome`.
    #[must_use]
    pub fn outcomes(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Outcome(label) => Some(label),
                _ => None,
            })
            .collect()
    }
}

impl OperationObserver for RecordingObserver {
    fn on_submitted(&self, _descriptor: &OperationDescriptor) {
        self.record(Notification::Submitted);
    }

    fn on_progress(&self, _descriptor: &OperationDescriptor, percent: u8) {
        self.record(Notification::Progress(percent));
    }

    fn on_informational(
        &self,
        _descriptor: &OperationDescriptor,
        message: &str,
        class: &MessageClass,
    ) {
        self.record(Notification::Informational {
            message: message.to_string(),
            fatal: class.is_fatal(),
        });
    }

    fn on_outcome(&self, _descriptor: &OperationDescriptor, outcome: &OperationOutcome) {
        self.record(Notification::Outcome(outcome.label().to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn recorder_keeps_arrival_order() -> Result<()> {
        let descriptor = OperationDescriptor::full_backup("Northwind", "northwind.bak").build()?;
        let observer = RecordingObserver::new();
        observer.on_submitted(&descriptor);
        observer.on_progress(&descriptor, 10);
        observer.on_informational(&descriptor, "10 percent processed.", &MessageClass::Benign);
        observer.on_progress(&descriptor, 20);
        observer.on_outcome(&descriptor, &OperationOutcome::Succeeded);

        assert_eq!(observer.progress(), vec![10, 20]);
        assert_eq!(observer.informational(), vec!["10 percent processed."]);
        assert_eq!(observer.outcomes(), vec!["succeeded"]);
        assert_eq!(observer.notifications().first(), Some(&Notification::Submitted));
        Ok(())
    }
}
