//! Engine collaborator contract and session lifecycle helpers.

use std::error::Error;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use dbvault_core::EngineEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::request::OperationRequest;

/// Filesystem-backed engine.
pub mod file;
/// Scripted engine used for dry runs and tests.
pub mod scripted;

/// Source of engine sessions.
#[async_trait]
pub trait BackupEngine: Send + Sync {
    /// Acquire a live session for a single operation.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine cannot be reached.
    async fn open_session(&self) -> Result<Box<dyn EngineSession>>;
}

/// One live connection to the engine.
///
/// The bridge calls [`EngineSession::release`] exactly once per acquired
/// session, after the operation has settled.
#[async_trait]
pub trait EngineSession: Send {
    /// Hand the request to the engine. Events for the operation must be sent
    /// through `events`; dropping every clone of the sink without a completion
    /// event is treated as a failure.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine rejects the request outright.
    async fn submit(&mut self, request: OperationRequest, events: EngineEventSink) -> Result<()>;

    /// Ask the engine to stop the running operation.
    ///
    /// Returns `Ok(false)` when the engine has no way to stop work in flight.
    ///
    /// # Errors
    ///
    /// Returns an error when the stop request itself fails.
    async fn abort(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Return the session to the engine.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine fails to release the session.
    async fn release(&mut self) -> Result<()>;
}

/// Sending half of the per-invocation event channel.
///
/// Every send reports whether the bridge is still listening; once the
/// invocation settles further events are dropped.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSink {
    /// Create a sink together with the receiver the bridge consumes.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Deliver a raw engine event.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Report progress.
    pub fn progress(&self, percent: u8) -> bool {
        self.emit(EngineEvent::Progress {
            percent: percent.min(100),
        })
    }

    /// Report an informational message.
    pub fn informational(&self, message: impl Into<String>) -> bool {
        self.emit(EngineEvent::Informational {
            message: message.into(),
        })
    }

    /// Report completion, with the error when the operation failed.
    pub fn completed(&self, error: Option<Box<dyn Error + Send + Sync>>) -> bool {
        self.emit(EngineEvent::Completed { error })
    }

    /// Whether the bridge has stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Owns an acquired session until it is released.
///
/// Dropping a lease that was never released hands the session to a
/// background task so the engine still gets it back.
pub(crate) struct SessionLease {
    session: Option<Box<dyn EngineSession>>,
    operation_id: Uuid,
}

impl SessionLease {
    pub(crate) fn new(session: Box<dyn EngineSession>, operation_id: Uuid) -> Self {
        Self {
            session: Some(session),
            operation_id,
        }
    }

    fn active(&mut self) -> Result<&mut Box<dyn EngineSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| anyhow!("engine session already released"))
    }

    pub(crate) async fn submit(
        &mut self,
        request: OperationRequest,
        events: EngineEventSink,
    ) -> Result<()> {
        self.active()?.submit(request, events).await
    }

    pub(crate) async fn abort(&mut self) -> Result<bool> {
        self.active()?.abort().await
    }

    pub(crate) async fn release(mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let operation_id = self.operation_id;
        warn!(%operation_id, "engine session dropped before release; releasing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match session.release().await {
                        Ok(()) => debug!(%operation_id, "engine session released in background"),
                        Err(err) => warn!(
                            %operation_id,
                            error = %err,
                            "failed to release engine session in background"
                        ),
                    }
                });
            }
            Err(_) => warn!(%operation_id, "no runtime available to release engine session"),
        }
    }
}
