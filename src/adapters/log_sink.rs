//! Log-based metrics sink adapter.
//!
//! Implements [`MetricsSink`] by writing every point to the logger.  Used
//! when no metrics store is configured, so telemetry still shows up in the
//! service journal.

use log::info;

use crate::app::ports::MetricsSink;
use crate::error::SinkError;
use crate::telemetry::TelemetryPoint;

/// Adapter that logs every [`TelemetryPoint`].
#[derive(Debug, Default)]
pub struct LogMetricsSink {
    written: u64,
}

impl LogMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points logged since startup.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl MetricsSink for LogMetricsSink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        for p in points {
            info!(
                "TELEM | {} | {}={} | {}",
                p.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                p.measurement,
                p.value,
                p.unit
            );
        }
        self.written += points.len() as u64;
        Ok(())
    }
}
