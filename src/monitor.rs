//! Failure monitor.
//!
//! Runs every tick after scheduling and compares each unit's feedback with
//! its intended state.  A running unit whose feedback is not active is
//! failing; the time of its first failure is kept until a check passes.
//!
//! ## Escalation
//!
//! 1. Every failing check emits `working_outlet = 0` and an error log.
//! 2. Once any record is older than `failure_threshold`, the driver's
//!    link-level recovery runs.  The fault is assumed to be link-wide, so
//!    one recovery per tick covers every aged record.
//! 3. The aged records restart their clocks, so a fault that survives the
//!    recovery escalates again one threshold later rather than every tick.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info, warn};

use crate::app::ports::{Clock, Feedback, MetricsSink, OutletDriver};
use crate::drivers::heater::HeaterResource;
use crate::error::DriverError;
use crate::telemetry::{OUTLET_HEALTH, TelemetryBatcher};

pub struct FailureMonitor {
    threshold: TimeDelta,
    /// Unit name → first failed check.
    failures: HashMap<String, DateTime<Utc>>,
    recoveries: u32,
}

impl FailureMonitor {
    pub fn new(threshold: TimeDelta) -> Self {
        Self {
            threshold,
            failures: HashMap::new(),
            recoveries: 0,
        }
    }

    /// Check every unit; returns whether a recovery was run.
    pub fn check<S: MetricsSink>(
        &mut self,
        heaters: &[HeaterResource],
        driver: &mut dyn OutletDriver,
        telemetry: &mut TelemetryBatcher<S>,
        clock: &dyn Clock,
    ) -> Result<bool, DriverError> {
        for heater in heaters {
            let feedback = match driver.read_feedback(heater.name()) {
                Ok(f) => f,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: feedback query failed: {}", heater.name(), e);
                    Feedback::Unknown
                }
            };

            let failing = heater.is_running() && feedback != Feedback::Active;
            if failing {
                let since = *self
                    .failures
                    .entry(heater.name().to_owned())
                    .or_insert_with(|| clock.now());
                error!("{} outlet is not functioning (since {})", heater.name(), since);
            } else if self.failures.remove(heater.name()).is_some() {
                info!("{} outlet is functioning again", heater.name());
            }
            telemetry.measure(OUTLET_HEALTH, heater.name(), if failing { 0.0 } else { 1.0 }, clock);
        }

        let now = clock.now();
        let aged: Vec<String> = self
            .failures
            .iter()
            .filter(|(_, since)| now - **since > self.threshold)
            .map(|(name, _)| name.clone())
            .collect();
        if aged.is_empty() {
            return Ok(false);
        }

        self.recoveries += 1;
        error!("Outlets failing past threshold ({}): restarting link", aged.join(", "));
        match driver.recover_link() {
            Ok(()) => info!("Link recovery complete"),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => error!("Link recovery failed: {}", e),
        }

        let restarted = clock.now();
        for name in aged {
            self.failures.insert(name, restarted);
        }
        Ok(true)
    }

    /// First failure time of a unit, if it is currently failing.
    pub fn failing_since(&self, unit: &str) -> Option<DateTime<Utc>> {
        self.failures.get(unit).copied()
    }

    pub fn failing_count(&self) -> usize {
        self.failures.len()
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }
}
