//! Service wiring for the driver.

use std::fs;
use std::sync::Arc;

use dbvault_bridge::{BackupEngine, FileEngine, OperationBridge, ScriptStep, ScriptedEngine};
use dbvault_config::PipelineConfig;
use dbvault_events::{Event, EventBus};
use dbvault_telemetry::{LogFormat, LoggingConfig, Metrics};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::pipeline::Pipeline;

/// Environment flag that selects the scripted engine.
pub(crate) const DRY_RUN_ENV: &str = "DBVAULT_DRY_RUN";

/// Wired services for one driver run.
pub(crate) struct Services {
    pub(crate) pipeline: Pipeline,
    pub(crate) events: EventBus,
    pub(crate) metrics: Metrics,
}

/// Install the tracing subscriber described by the configuration.
pub(crate) fn init_logging(config: &PipelineConfig) -> AppResult<()> {
    let logging = LoggingConfig {
        level: config.logging.level.as_str(),
        format: LogFormat::from_name(config.logging.format.as_deref()),
        ..LoggingConfig::default()
    };
    dbvault_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))
}

/// Build the engine, bridge, and pipeline.
pub(crate) fn build_services(config: &PipelineConfig, dry_run: bool) -> AppResult<Services> {
    let events = EventBus::new();
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let engine = build_engine(config, dry_run)?;
    let bridge = OperationBridge::new(engine)
        .with_classifier(config.classifier())
        .with_metrics(metrics.clone());
    let pipeline = Pipeline::new(bridge, events.clone(), config)?;
    Ok(Services {
        pipeline,
        events,
        metrics,
    })
}

fn build_engine(config: &PipelineConfig, dry_run: bool) -> AppResult<Arc<dyn BackupEngine>> {
    if dry_run {
        info!("dry run: operations are simulated by the scripted engine");
        let step = config.progress_percent;
        return Ok(Arc::new(ScriptedEngine::new(ScriptStep::successful_run(
            step,
        ))));
    }
    fs::create_dir_all(&config.backup_dir).map_err(|source| AppError::Io {
        operation: "backup_dir.create",
        path: Some(config.backup_dir.clone()),
        source,
    })?;
    info!(
        data_dir = %config.data_dir.display(),
        backup_dir = %config.backup_dir.display(),
        "using file engine"
    );
    Ok(Arc::new(FileEngine::new(
        config.data_dir.clone(),
        config.backup_dir.clone(),
    )))
}

/// Whether the scripted engine was requested by flag or environment.
pub(crate) fn dry_run_requested(flag: bool) -> bool {
    flag || env_flag(DRY_RUN_ENV)
}

fn env_flag(name: &str) -> bool {
    env_flag_value(std::env::var(name).ok().as_deref())
}

fn env_flag_value(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Cancel `cancel` when the process receives Ctrl-C.
pub(crate) fn spawn_ctrl_c(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; cancelling the current operation");
                cancel.cancel();
            }
            Err(err) => warn!(error = %err, "failed to listen for interrupt"),
        }
    })
}

/// Log every bus event until the bus is dropped.
pub(crate) fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        while let Some(envelope) = stream.next().await {
            log_event(&envelope.event);
        }
    })
}

fn log_event(event: &Event) {
    match event {
        Event::OperationSubmitted {
            operation_id,
            kind,
            target,
            location,
        } => info!(%operation_id, %kind, %target, %location, "operation submitted"),
        Event::Progress {
            operation_id,
            percent,
        } => info!(%operation_id, percent, "{percent} percent processed"),
        Event::Informational {
            operation_id,
            message,
            fatal,
        } => {
            if *fatal {
                warn!(%operation_id, "{message}");
            } else {
                info!(%operation_id, "{message}");
            }
        }
        Event::OperationSettled {
            operation_id,
            status,
            ..
        } => debug!(%operation_id, %status, "operation settled event"),
        Event::ArtifactRemoved { path } => debug!(%path, "artifact removed event"),
    }
}
