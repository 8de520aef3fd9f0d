//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters relevant to backup/restore operations only.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    operations_total: IntCounterVec,
    informational_messages_total: IntCounterVec,
    progress_events_total: IntCounter,
    session_release_failures_total: IntCounter,
    active_operations: IntGauge,
}

/// Snapshot of selected gauges and counters for status reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Operations currently in flight.
    pub active_operations: i64,
    /// Progress events relayed to observers.
    pub progress_events_total: u64,
    /// Engine sessions whose release failed.
    pub session_release_failures_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new(
                "dbvault_operations_total",
                "Settled backup/restore operations by kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .map_err(|source| TelemetryError::build("dbvault_operations_total", source))?;
        let informational_messages_total = IntCounterVec::new(
            Opts::new(
                "dbvault_informational_messages_total",
                "Engine informational messages by classification",
            ),
            &["class"],
        )
        .map_err(|source| TelemetryError::build("dbvault_informational_messages_total", source))?;
        let progress_events_total = IntCounter::with_opts(Opts::new(
            "dbvault_progress_events_total",
            "Progress events relayed to observers",
        ))
        .map_err(|source| TelemetryError::build("dbvault_progress_events_total", source))?;
        let session_release_failures_total = IntCounter::with_opts(Opts::new(
            "dbvault_session_release_failures_total",
            "Engine sessions whose release failed",
        ))
        .map_err(|source| TelemetryError::build("dbvault_session_release_failures_total", source))?;
        let active_operations = IntGauge::with_opts(Opts::new(
            "dbvault_active_operations",
            "Operations currently in flight",
        ))
        .map_err(|source| TelemetryError::build("dbvault_active_operations", source))?;

        register(&registry, "dbvault_operations_total", &operations_total)?;
        register(
            &registry,
            "dbvault_informational_messages_total",
            &informational_messages_total,
        )?;
        register(
            &registry,
            "dbvault_progress_events_total",
            &progress_events_total,
        )?;
        register(
            &registry,
            "dbvault_session_release_failures_total",
            &session_release_failures_total,
        )?;
        register(&registry, "dbvault_active_operations", &active_operations)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                operations_total,
                informational_messages_total,
                progress_events_total,
                session_release_failures_total,
                active_operations,
            }),
        })
    }

    /// Mark an operation as started.
    pub fn operation_started(&self) {
        self.inner.active_operations.inc();
    }

    /// Record a settled operation and drop it from the in-flight gauge.
    pub fn operation_settled(&self, kind: &str, outcome: &str) {
        self.inner.active_operations.dec();
        self.inner
            .operations_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Count a classified informational message.
    pub fn inc_informational(&self, class: &str) {
        self.inner
            .informational_messages_total
            .with_label_values(&[class])
            .inc();
    }

    /// Count a relayed progress event.
    pub fn inc_progress(&self) {
        self.inner.progress_events_total.inc();
    }

    /// Count a failed session release.
    pub fn inc_release_failure(&self) {
        self.inner.session_release_failures_total.inc();
    }

    /// Number of settled operations with the given kind and outcome.
    #[must_use]
    pub fn operations(&self, kind: &str, outcome: &str) -> u64 {
        self.inner
            .operations_total
            .with_label_values(&[kind, outcome])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(TelemetryError::render)?;
        String::from_utf8(buffer).map_err(TelemetryError::render)
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_operations: self.inner.active_operations.get(),
            progress_events_total: self.inner.progress_events_total.get(),
            session_release_failures_total: self.inner.session_release_failures_total.get(),
        }
    }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::register(name, source))
}
