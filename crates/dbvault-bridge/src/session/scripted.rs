//! Engine double that plays back a fixed script of events.
//!
//! The scripted engine never touches a database. It is used by the driver's
//! dry-run mode and throughout the test suites to reproduce engine behaviour
//! that is hard to trigger on demand (late events, missing completions,
//! release failures).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{BackupEngine, EngineEventSink, EngineSession};
use crate::request::OperationRequest;

/// One step of a scripted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Emit a progress event.
    Progress(u8),
    /// Emit an informational message.
    Informational(String),
    /// Emit a successful completion event.
    Complete,
    /// Emit a completion event carrying an error with this message.
    CompleteWithError(String),
    /// Wait before the next step.
    Pause(Duration),
}

impl ScriptStep {
    /// Convenience constructor for informational steps.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::Informational(message.into())
    }

    /// Steps that report progress at every `step` percent and then complete.
    #[must_use]
    pub fn successful_run(step: u8) -> Vec<Self> {
        let step = step.clamp(1, 100);
        let mut steps: Vec<Self> = (1..=100 / step)
            .map(|index| Self::Progress(index * step))
            .collect();
        if 100 % step != 0 {
            steps.push(Self::Progress(100));
        }
        steps.push(Self::Complete);
        steps
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    opens: AtomicUsize,
    submits: AtomicUsize,
    aborts: AtomicUsize,
    releases: AtomicUsize,
    requests: Mutex<Vec<OperationRequest>>,
}

/// Engine that replays [`ScriptStep`]s for every submitted request.
///
/// Clones share their call counters.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Vec<ScriptStep>,
    fail_open: Option<String>,
    fail_submit: Option<String>,
    fail_release: Option<String>,
    supports_abort: bool,
    state: Arc<ScriptedState>,
}

impl ScriptedEngine {
    /// Engine that plays `script` for every submission.
    #[must_use]
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Fail every session acquisition with `message`.
    #[must_use]
    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.fail_open = Some(message.into());
        self
    }

    /// Reject every submission with `message`.
    #[must_use]
    pub fn failing_submit(mut self, message: impl Into<String>) -> Self {
        self.fail_submit = Some(message.into());
        self
    }

    /// Fail every session release with `message`.
    #[must_use]
    pub fn failing_release(mut self, message: impl Into<String>) -> Self {
        self.fail_release = Some(message.into());
        self
    }

    /// Let sessions stop a running script on request.
    #[must_use]
    pub fn with_abort(mut self) -> Self {
        self.supports_abort = true;
        self
    }

    /// Number of sessions acquired.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of submissions received.
    #[must_use]
    pub fn submits(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }

    /// Number of abort requests received.
    #[must_use]
    pub fn aborts(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }

    /// Number of release calls received.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Requests submitted so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<OperationRequest> {
        self.state
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BackupEngine for ScriptedEngine {
    async fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_open {
            bail!("{message}");
        }
        Ok(Box::new(ScriptedSession {
            engine: self.clone(),
            playback: None,
        }))
    }
}

struct ScriptedSession {
    engine: ScriptedEngine,
    playback: Option<JoinHandle<()>>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn submit(&mut self, request: OperationRequest, events: EngineEventSink) -> Result<()> {
        let state = &self.engine.state;
        state.submits.fetch_add(1, Ordering::SeqCst);
        state
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        if let Some(message) = &self.engine.fail_submit {
            bail!("{message}");
        }

        let script = self.engine.script.clone();
        self.playback = Some(tokio::spawn(play(script, events)));
        Ok(())
    }

    async fn abort(&mut self) -> Result<bool> {
        self.engine.state.aborts.fetch_add(1, Ordering::SeqCst);
        if !self.engine.supports_abort {
            return Ok(false);
        }
        if let Some(playback) = self.playback.take() {
            playback.abort();
            match playback.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => return Err(anyhow!("scripted playback failed: {err}")),
            }
        }
        Ok(true)
    }

    async fn release(&mut self) -> Result<()> {
        self.engine.state.releases.fetch_add(1, Ordering::SeqCst);
        match &self.engine.fail_release {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

async fn play(script: Vec<ScriptStep>, events: EngineEventSink) {
    for step in script {
        let delivered = match step {
            ScriptStep::Progress(percent) => events.progress(percent),
            ScriptStep::Informational(message) => events.informational(message),
            ScriptStep::Complete => events.completed(None),
            ScriptStep::CompleteWithError(message) => {
                events.completed(Some(anyhow!(message).into()))
            }
            ScriptStep::Pause(duration) => {
                tokio::time::sleep(duration).await;
                true
            }
        };
        if !delivered {
            debug!("scripted event dropped after settlement");
        }
    }
}
