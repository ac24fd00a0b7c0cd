//! Ambient temperature with fallback.
//!
//! The probe is read twice, `reread_delay` apart, and the second answer
//! wins when both arrive (the first read of a slow probe is often stale).
//! If neither read is usable the reader asks the metrics store for a
//! recent value at the site, and failing that keeps the last known one.
//! A sensor fault is never fatal; losing the device link behind the probe
//! is, and is handed back to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, warn};

use crate::app::ports::{Clock, HistoryPort, OutletDriver};
use crate::config::SensorConfig;
use crate::error::SensorError;
use crate::telemetry::TEMPERATURE;

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingSource {
    Probe,
    History,
    LastKnown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub fahrenheit: f32,
    pub source: ReadingSource,
}

impl TemperatureReading {
    /// The probe itself answered.
    pub fn probe_ok(&self) -> bool {
        self.source == ReadingSource::Probe
    }
}

pub struct TemperatureReader {
    last: f32,
    last_probe_at: Option<DateTime<Utc>>,
    reread_delay: Duration,
    fallback_window: Duration,
    fallback_location: String,
}

impl TemperatureReader {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            last: config.initial_fahrenheit,
            last_probe_at: None,
            reread_delay: Duration::from_secs(u64::from(config.reread_delay_secs)),
            fallback_window: Duration::from_secs(u64::from(config.fallback_window_secs)),
            fallback_location: config.fallback_location.clone(),
        }
    }

    pub fn last(&self) -> f32 {
        self.last
    }

    /// Time of the last good probe read.
    pub fn last_probe_at(&self) -> Option<DateTime<Utc>> {
        self.last_probe_at
    }

    pub fn read(
        &mut self,
        driver: &mut dyn OutletDriver,
        history: &mut dyn HistoryPort,
        clock: &dyn Clock,
    ) -> Result<TemperatureReading, SensorError> {
        let first = driver.read_temperature();
        if let Err(e) = first {
            if e.is_fatal() {
                return Err(e);
            }
        }
        clock.sleep(self.reread_delay);
        let second = driver.read_temperature();

        match second.or(first) {
            Ok(t) => {
                self.last = t;
                self.last_probe_at = Some(clock.now());
                return Ok(TemperatureReading {
                    fahrenheit: t,
                    source: ReadingSource::Probe,
                });
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!("Temperature probe fault: {}", e),
        }

        match history.latest_value(TEMPERATURE, &self.fallback_location, self.fallback_window) {
            Some(v) if v.is_finite() => {
                warn!("Using historical temperature {:.1}°F", v);
                self.last = v as f32;
                Ok(TemperatureReading {
                    fahrenheit: self.last,
                    source: ReadingSource::History,
                })
            }
            _ => {
                warn!("Keeping last known temperature {:.1}°F", self.last);
                Ok(TemperatureReading {
                    fahrenheit: self.last,
                    source: ReadingSource::LastKnown,
                })
            }
        }
    }
}
