//! Observer contract exposed to drivers of the operation bridge.

use crate::classify::MessageClass;
use crate::model::{OperationDescriptor, OperationOutcome};

/// Receives notifications for one operation.
///
/// Callbacks run on the task driving the operation, in the order the engine
/// delivered the underlying events; implementations should return quickly.
pub trait OperationObserver: Send + Sync {
    /// The engine accepted the request; default implementation ignores it.
    fn on_submitted(&self, descriptor: &OperationDescriptor) {
        let _ = descriptor;
    }

    /// A progress event was relayed.
    fn on_progress(&self, descriptor: &OperationDescriptor, percent: u8);

    /// An informational message was classified; default implementation ignores it.
    fn on_informational(
        &self,
        descriptor: &OperationDescriptor,
        message: &str,
        class: &MessageClass,
    ) {
        let _ = (descriptor, message, class);
    }

    /// The operation settled. Called exactly once per invocation.
    fn on_outcome(&self, descriptor: &OperationDescriptor, outcome: &OperationOutcome);
}

/// Observer that discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn on_progress(&self, _descriptor: &OperationDescriptor, _percent: u8) {}

    fn on_outcome(&self, _descriptor: &OperationDescriptor, _outcome: &OperationOutcome) {}
}
