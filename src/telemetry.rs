//! Telemetry points and the batching layer in front of the metrics store.
//!
//! Points are buffered in insertion order and shipped as one batch when the
//! buffer reaches `max_points` or `flush_interval` has passed since the last
//! successful flush.  When the store is unreachable the buffer keeps only the
//! newest `max_points` points: bounded memory wins over completeness.
//!
//! A failed flush (every attempt exhausted) leaves the buffer intact and
//! holds off the next automatic flush for one `flush_interval`, so a dead
//! store costs one retry chain per interval rather than one per point.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app::ports::{Clock, MetricsSink};
use crate::config::TelemetryConfig;
use crate::error::SinkError;

// Measurement names understood by the downstream dashboards.
pub const TEMPERATURE: &str = "temperature_fahrenheit";
pub const SENSOR_HEALTH: &str = "working_dht22";
pub const OUTLET_HEALTH: &str = "working_outlet";
pub const UNIT_RUNNING: &str = "running_heater";
pub const UNIT_REMAINING: &str = "remaining_runtime";

/// Unit tag for measurements that do not belong to one heater.
pub const NO_UNIT: &str = "none";

/// One timestamped measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPoint {
    pub measurement: &'static str,
    /// Heater name, or [`NO_UNIT`].
    pub unit: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryPoint {
    pub fn new(measurement: &'static str, unit: &str, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement,
            unit: unit.to_owned(),
            value,
            timestamp,
        }
    }
}

/// Buffers points and flushes them to a [`MetricsSink`].
pub struct TelemetryBatcher<S: MetricsSink> {
    sink: S,
    buffer: VecDeque<TelemetryPoint>,
    max_points: usize,
    flush_interval: TimeDelta,
    send_attempts: u32,
    retry_delay: Duration,
    last_flush: DateTime<Utc>,
    /// Automatic flushes are suppressed until then after a failed chain.
    hold_until: Option<DateTime<Utc>>,
    dropped: u64,
}

impl<S: MetricsSink> TelemetryBatcher<S> {
    pub fn new(sink: S, config: &TelemetryConfig, now: DateTime<Utc>) -> Self {
        Self {
            sink,
            buffer: VecDeque::with_capacity(config.max_points.max(1) + 1),
            max_points: config.max_points.max(1),
            flush_interval: TimeDelta::seconds(i64::from(config.flush_interval_secs)),
            send_attempts: config.send_attempts.max(1),
            retry_delay: Duration::from_millis(u64::from(config.retry_delay_ms)),
            last_flush: now,
            hold_until: None,
            dropped: 0,
        }
    }

    /// Buffer a measurement stamped with the clock's current time.
    pub fn measure(&mut self, measurement: &'static str, unit: &str, value: f64, clock: &dyn Clock) {
        let point = TelemetryPoint::new(measurement, unit, value, clock.now());
        self.record(point, clock);
    }

    /// Append a point and flush if a threshold is reached.
    pub fn record(&mut self, point: TelemetryPoint, clock: &dyn Clock) {
        self.buffer.push_back(point);

        let now = clock.now();
        let held = self.hold_until.is_some_and(|until| now < until);
        let due = self.buffer.len() >= self.max_points || now - self.last_flush >= self.flush_interval;
        if due && !held {
            if let Err(e) = self.flush(clock) {
                debug!("Telemetry: {} points held for the next flush ({})", self.buffer.len(), e);
            }
        }
        self.drop_excess();
    }

    /// Send the whole buffer as one batch, retrying with a fixed delay.
    ///
    /// Returns the number of points delivered.
    pub fn flush(&mut self, clock: &dyn Clock) -> Result<usize, SinkError> {
        self.drop_excess();
        if self.buffer.is_empty() {
            self.last_flush = clock.now();
            return Ok(0);
        }

        let batch = self.buffer.make_contiguous();
        let count = batch.len();
        let mut last_err = SinkError::Unreachable;
        let mut delivered = false;

        for attempt in 1..=self.send_attempts {
            match self.sink.write_points(batch) {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    warn!("Telemetry: batch attempt {}/{} failed: {}", attempt, self.send_attempts, e);
                    last_err = e;
                }
            }
            if attempt < self.send_attempts {
                clock.sleep(self.retry_delay);
            }
        }

        let now = clock.now();
        if delivered {
            info!("Telemetry: sent {} points", count);
            self.buffer.clear();
            self.last_flush = now;
            self.hold_until = None;
            Ok(count)
        } else {
            error!("Telemetry: failed to send {} points: {}", count, last_err);
            self.hold_until = Some(now + self.flush_interval);
            Err(last_err)
        }
    }

    /// Backpressure: keep only the newest `max_points` points.
    fn drop_excess(&mut self) {
        let excess = self.buffer.len().saturating_sub(self.max_points);
        if excess > 0 {
            self.buffer.drain(..excess);
            self.dropped += excess as u64;
            warn!("Telemetry: dropped {} oldest points ({} total)", excess, self.dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Buffered points, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &TelemetryPoint> {
        self.buffer.iter()
    }

    /// Points discarded under backpressure since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
