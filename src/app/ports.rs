//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlLoop (domain)
//! ```
//!
//! Driven adapters (outlet board, metrics store, persisted document, clock)
//! implement these traits.  The [`ControlLoop`](super::service::ControlLoop)
//! consumes them at call sites, so the domain core never touches a serial
//! port, a GPIO pin or a network socket directly.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::SystemConfig;
use crate::error::{ConfigError, DriverError, LinkError, SensorError, SinkError};
use crate::telemetry::TelemetryPoint;

// ───────────────────────────────────────────────────────────────
// Outlet driver (driven adapter: domain ↔ outlet hardware)
// ───────────────────────────────────────────────────────────────

/// What a unit's feedback channel reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// The unit is drawing power / producing heat.
    Active,
    Inactive,
    /// The query itself failed.
    Unknown,
}

/// Capability contract for switching outlets and reading the board's sensors.
///
/// A unit is addressed by its stable name; each implementation maps names
/// to its own wiring.  Fatal errors ([`DriverError::is_fatal`]) must be
/// propagated, everything else may be logged and absorbed.
pub trait OutletDriver {
    /// Command a unit's outlet on or off.
    fn set_output(&mut self, unit: &str, on: bool) -> Result<(), DriverError>;

    /// Query a unit's feedback channel.
    fn read_feedback(&mut self, unit: &str) -> Result<Feedback, DriverError>;

    /// Read the ambient temperature probe (°F).
    fn read_temperature(&mut self) -> Result<f32, SensorError>;

    /// Single non-blocking query of the manual refuel signal.
    fn refuel_signal(&mut self) -> Result<bool, DriverError>;

    /// Link-wide recovery (reopen, handshake, power cycle).  Drivers with
    /// no shared link have nothing to recover.
    fn recover_link(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    /// Poll the refuel signal every `interval` until it fires or `timeout`
    /// elapses.  Returns `Ok(true)` when it fired.
    fn check_refuel_signal(
        &mut self,
        clock: &dyn Clock,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool, DriverError> {
        let start = clock.now();
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        loop {
            match self.refuel_signal() {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => log::warn!("Refuel signal query failed: {}", e),
            }
            clock.sleep(interval);
            if clock.now() - start >= timeout {
                return Ok(false);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Metrics sink (driven adapter: domain → metrics store)
// ───────────────────────────────────────────────────────────────

/// Accepts batches of timestamped, tagged points.  A batch either lands
/// completely or not at all.
pub trait MetricsSink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError>;
}

impl<T: MetricsSink + ?Sized> MetricsSink for Box<T> {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        (**self).write_points(points)
    }
}

/// Read-back of recent history from the metrics store (sensor fallback).
pub trait HistoryPort {
    /// Most recent value of `measurement` tagged with `location`, no older
    /// than `window`.
    fn latest_value(&mut self, measurement: &str, location: &str, window: Duration)
    -> Option<f64>;
}

/// No history available (metrics store not configured).
pub struct NoHistory;

impl HistoryPort for NoHistory {
    fn latest_value(&mut self, _: &str, _: &str, _: Duration) -> Option<f64> {
        None
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persisted document)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the system document.
///
/// Implementations MUST validate before persisting and MUST write the
/// document atomically — a crash mid-write must leave the previous copy.
pub trait ConfigPort {
    /// Load the document.  Returns [`ConfigError::NotFound`] when there is
    /// none yet; the caller decides whether defaults apply.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist the full document.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

/// The fields of a unit that change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitState {
    pub used: u32,
    pub running: bool,
}

/// Write-through persistence of per-unit state.
pub trait StatePort {
    fn persist(&mut self, unit: &str, state: UnitState) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Clock (driven adapter: domain ↔ time)
// ───────────────────────────────────────────────────────────────

/// Time source and ticker.  Every delay in the controller goes through
/// [`Clock::sleep`] so a simulated clock can run it instantly.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration);

    /// Local hour-of-day (0–23), `None` if the wall clock is not trusted.
    fn current_hour(&self) -> Option<u8>;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }

    fn current_hour(&self) -> Option<u8> {
        (**self).current_hour()
    }
}
