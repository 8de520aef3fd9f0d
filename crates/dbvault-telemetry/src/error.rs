//! Error types for logging and metrics setup.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use prometheus::Error as PrometheusError;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while wiring logging or metrics.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed.
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: TryInitError,
    },
    /// A collector could not be built or registered.
    Metric {
        /// Setup step (`metrics.build`, `metrics.register`).
        operation: &'static str,
        /// Metric name.
        metric: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// The registry could not be rendered in the text exposition format.
    Render {
        /// Encoder or UTF-8 conversion error.
        source: Box<dyn Error + Send + Sync>,
    },
}

impl TelemetryError {
    pub(crate) const fn build(metric: &'static str, source: PrometheusError) -> Self {
        Self::Metric {
            operation: "metrics.build",
            metric,
            source,
        }
    }

    pub(crate) const fn register(metric: &'static str, source: PrometheusError) -> Self {
        Self::Metric {
            operation: "metrics.register",
            metric,
            source,
        }
    }

    pub(crate) fn render(source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Render {
            source: source.into(),
        }
    }
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::SubscriberInstall { .. } => "logging subscriber could not be installed",
            Self::Metric { .. } => "metrics collector setup failed",
            Self::Render { .. } => "metrics could not be rendered",
        })
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SubscriberInstall { source } => Some(source),
            Self::Metric { source, .. } => Some(source),
            Self::Render { source } => Some(source.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_errors_keep_step_and_name() {
        let err = TelemetryError::register(
            "dbvault_operations_total",
            PrometheusError::AlreadyReg,
        );
        assert_eq!(err.to_string(), "metrics collector setup failed");
        assert!(err.source().is_some());
        match err {
            TelemetryError::Metric {
                operation, metric, ..
            } => {
                assert_eq!(operation, "metrics.register");
                assert_eq!(metric, "dbvault_operations_total");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn render_errors_wrap_conversion_failures() {
        let Err(utf8) = String::from_utf8(vec![0, 159]) else {
            panic!("expected invalid utf-8");
        };
        let err = TelemetryError::render(utf8);
        assert_eq!(err.to_string(), "metrics could not be rendered");
        assert!(err.source().is_some());
    }
}
