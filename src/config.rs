//! System configuration and persisted unit state.
//!
//! A single JSON document describes every heating unit (capacity, usage,
//! running flag, ignition and cycling behaviour, wiring), the scheduling
//! setpoint and demand function, loop timing, and site tags.  The same
//! document doubles as the crash-safe state record: every change to a
//! unit's `used` or `running` rewrites it in full.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::scheduler::RefuelWindow;

/// Maximum number of steps in a demand table.
pub const MAX_DEMAND_STEPS: usize = 8;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Heating units keyed by stable name.
    pub heaters: BTreeMap<String, HeaterConfig>,
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub ignition: IgnitionConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub refuel: RefuelConfig,
    pub site: SiteConfig,
    /// Command run by the binary when the outlet board has vanished.
    #[serde(default = "default_restart_command")]
    pub host_restart_command: Vec<String>,
}

// --- Per-unit ---

/// One physical heating unit: wiring, behaviour and persisted usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaterConfig {
    /// Outlet letter on the microcontroller board.
    pub outlet: char,
    /// Feedback channel digit on the microcontroller board.
    pub feedback: char,
    /// Prime with a pulse sequence before settling on.
    #[serde(default)]
    pub multistart: bool,
    /// Periodic anti-fouling off/on cycle while running.
    #[serde(default)]
    pub cycle: bool,
    /// Intended hardware state, recovered on restart.
    #[serde(default)]
    pub running: bool,
    /// Minutes of runtime allowed per refuel.
    pub capacity: u32,
    /// Minutes consumed since the last refuel.
    #[serde(default, deserialize_with = "whole_minutes")]
    pub used: u32,
    /// Relay is active-low (direct GPIO driver only).
    #[serde(default)]
    pub invert: bool,
    /// Relay output pin (direct GPIO driver only).
    #[serde(default)]
    pub relay_pin: Option<u8>,
    /// Feedback input pin (direct GPIO driver only).
    #[serde(default)]
    pub feedback_pin: Option<u8>,
}

impl HeaterConfig {
    fn new(outlet: char, feedback: char, multistart: bool, capacity: u32) -> Self {
        Self {
            outlet,
            feedback,
            multistart,
            cycle: true,
            running: false,
            capacity,
            used: 0,
            invert: false,
            relay_pin: None,
            feedback_pin: None,
        }
    }
}

/// Older documents stored `used` as fractional minutes.
fn whole_minutes<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    let minutes = f64::deserialize(de)?;
    Ok(if minutes.is_finite() && minutes > 0.0 {
        minutes.floor().min(f64::from(u32::MAX)) as u32
    } else {
        0
    })
}

// --- Scheduling ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Target temperature (°F).
    pub setpoint: f32,
    /// Band below the setpoint over which demand scales to every unit (°F).
    pub tolerance: f32,
    #[serde(default)]
    pub demand: DemandFunction,
    /// When the running count already matches demand, still converge the
    /// running set onto the most-preferred units.
    #[serde(default = "default_true")]
    pub reconcile_on_match: bool,
    /// Remaining-runtime gap (minutes) beyond which usage balance overrides
    /// every other preference.
    #[serde(default = "default_balance_threshold")]
    pub balance_threshold_mins: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            setpoint: 60.0,
            tolerance: 3.0,
            demand: DemandFunction::Linear,
            reconcile_on_match: true,
            balance_threshold_mins: default_balance_threshold(),
        }
    }
}

/// Temperature → unit-count mapping, selected by configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DemandFunction {
    /// Scale linearly across the tolerance band.
    #[default]
    Linear,
    /// Ordered (threshold, count) steps, ascending by threshold.
    Table {
        steps: heapless::Vec<DemandStep, MAX_DEMAND_STEPS>,
    },
}

/// Run `units` heaters while the temperature is at or below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandStep {
    pub threshold: f32,
    pub units: usize,
}

// --- Timing ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minimum spacing between scheduling passes.
    pub schedule_interval_secs: u32,
    /// Spacing between anti-fouling maintenance cycles.
    pub cycle_interval_secs: u32,
    /// Sustained feedback mismatch before link recovery is attempted.
    pub failure_threshold_secs: u32,
    /// How long each tick waits on the refuel signal (also paces the loop).
    pub refuel_poll_secs: u32,
    /// Spacing between refuel signal queries within one poll window.
    pub refuel_poll_interval_secs: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            schedule_interval_secs: 5 * 60,
            cycle_interval_secs: 18 * 60,
            failure_threshold_secs: 3 * 60,
            refuel_poll_secs: 60,
            refuel_poll_interval_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn schedule_interval(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.schedule_interval_secs))
    }

    pub fn cycle_interval(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.cycle_interval_secs))
    }

    pub fn failure_threshold(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.failure_threshold_secs))
    }

    /// Scheduling interval in whole minutes (eligibility horizon).
    pub fn schedule_interval_mins(&self) -> i64 {
        i64::from(self.schedule_interval_secs / 60)
    }
}

// --- Ignition ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnitionConfig {
    /// Priming pulses for multi-pulse ignition.
    pub pulses: u32,
    pub pulse_on_secs: u32,
    pub pulse_off_secs: u32,
    /// Settle delay after the final "on" command.
    pub settle_ms: u32,
    /// Pulses used by the maintenance cycle.
    pub cycle_pulses: u32,
}

impl Default for IgnitionConfig {
    fn default() -> Self {
        Self {
            pulses: 2,
            pulse_on_secs: 20,
            pulse_off_secs: 5,
            settle_ms: 500,
            cycle_pulses: 2,
        }
    }
}

impl IgnitionConfig {
    pub fn pulse_on(&self) -> Duration {
        Duration::from_secs(u64::from(self.pulse_on_secs))
    }

    pub fn pulse_off(&self) -> Duration {
        Duration::from_secs(u64::from(self.pulse_off_secs))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(u64::from(self.settle_ms))
    }
}

// --- Temperature probe ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Probe pin / channel on the board.
    pub pin: u8,
    /// Pause between the two reads of one sample.
    pub reread_delay_secs: u32,
    /// How far back the historical fallback may look.
    pub fallback_window_secs: u32,
    /// Location tag the historical fallback queries.
    pub fallback_location: String,
    /// Value reported before the first good read.
    pub initial_fahrenheit: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pin: 21,
            reread_delay_secs: 2,
            fallback_window_secs: 5 * 60,
            fallback_location: "Greenhouse".into(),
            initial_fahrenheit: 57.0,
        }
    }
}

// --- Device link ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Device nodes are discovered by this path prefix.
    pub device_prefix: String,
    pub baud: u32,
    /// Per-read response timeout.
    pub timeout_ms: u32,
    /// Sends per command before the exchange is declared failed.
    pub attempts: u32,
    /// Probe attempts per reopen.
    pub handshake_attempts: u32,
    pub handshake_backoff_ms: u32,
    /// Device-level power cycle (e.g. USB bus reset).
    pub power_cycle_command: Vec<String>,
    /// Pause after a power cycle before reopening.
    pub power_cycle_settle_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_prefix: "/dev/ttyUSB".into(),
            baud: 57_600,
            timeout_ms: 1_000,
            attempts: 3,
            handshake_attempts: 5,
            handshake_backoff_ms: 1_000,
            power_cycle_command: vec![
                "sudo".into(),
                "usbreset".into(),
                "/dev/bus/usb/001/002".into(),
            ],
            power_cycle_settle_ms: 2_000,
        }
    }
}

// --- Telemetry ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Buffer bound; reaching it triggers a flush.
    pub max_points: usize,
    /// Flush at least this often.
    pub flush_interval_secs: u32,
    pub send_attempts: u32,
    pub retry_delay_ms: u32,
    /// Metrics store; points are only logged when absent.
    pub influx: Option<InfluxConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_points: 100,
            flush_interval_secs: 60,
            send_attempts: 10,
            retry_delay_ms: 200,
            influx: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL, e.g. `https://metrics.example:8086`.
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_influx_timeout")]
    pub timeout_secs: u32,
}

// --- Refuel ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefuelConfig {
    /// Daily window in which usage is reset without a manual signal.
    pub window: Option<RefuelWindow>,
}

// --- Site ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub location: String,
    pub controller: String,
}

fn default_true() -> bool {
    true
}

fn default_balance_threshold() -> u32 {
    20
}

fn default_influx_timeout() -> u32 {
    60
}

fn default_restart_command() -> Vec<String> {
    vec!["sudo".into(), "reboot".into()]
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut heaters = BTreeMap::new();
        heaters.insert("heater_a".into(), HeaterConfig::new('a', '1', false, 10 * 60));
        heaters.insert("heater_b".into(), HeaterConfig::new('b', '2', true, 510));
        heaters.insert("heater_c".into(), HeaterConfig::new('c', '3', false, 10 * 60));

        Self {
            heaters,
            scheduling: SchedulingConfig::default(),
            timing: TimingConfig::default(),
            ignition: IgnitionConfig::default(),
            sensor: SensorConfig::default(),
            link: LinkConfig::default(),
            telemetry: TelemetryConfig::default(),
            refuel: RefuelConfig::default(),
            site: SiteConfig {
                location: "greenhouse".into(),
                controller: "thermostatOutlet1".into(),
            },
            host_restart_command: default_restart_command(),
        }
    }
}

/// Range-check a document before it is persisted or put into service.
pub fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    if cfg.heaters.is_empty() {
        return Err(ConfigError::ValidationFailed("at least one heater is required"));
    }
    for heater in cfg.heaters.values() {
        if heater.capacity == 0 {
            return Err(ConfigError::ValidationFailed("heater capacity must be > 0"));
        }
        if !heater.outlet.is_ascii_alphabetic() {
            return Err(ConfigError::ValidationFailed("outlet code must be an ASCII letter"));
        }
        if !heater.feedback.is_ascii_digit() {
            return Err(ConfigError::ValidationFailed("feedback code must be an ASCII digit"));
        }
    }

    let sched = &cfg.scheduling;
    if !sched.setpoint.is_finite() {
        return Err(ConfigError::ValidationFailed("setpoint must be finite"));
    }
    if !(sched.tolerance.is_finite() && sched.tolerance > 0.0) {
        return Err(ConfigError::ValidationFailed("tolerance must be > 0"));
    }
    if let DemandFunction::Table { steps } = &sched.demand {
        let Some(last) = steps.last() else {
            return Err(ConfigError::ValidationFailed("demand table must not be empty"));
        };
        if !steps.iter().all(|s| s.threshold.is_finite()) {
            return Err(ConfigError::ValidationFailed("demand thresholds must be finite"));
        }
        let ordered = steps
            .windows(2)
            .all(|w| w[0].threshold < w[1].threshold && w[0].units >= w[1].units);
        if !ordered {
            return Err(ConfigError::ValidationFailed(
                "demand table thresholds must ascend with non-increasing counts",
            ));
        }
        if last.threshold < sched.setpoint {
            return Err(ConfigError::ValidationFailed(
                "last demand step must reach the setpoint",
            ));
        }
    }

    if !cfg.sensor.initial_fahrenheit.is_finite() {
        return Err(ConfigError::ValidationFailed("initial temperature must be finite"));
    }
    if cfg.timing.schedule_interval_secs < 60 {
        return Err(ConfigError::ValidationFailed("schedule_interval_secs must be >= 60"));
    }
    if cfg.timing.refuel_poll_interval_secs == 0 {
        return Err(ConfigError::ValidationFailed("refuel_poll_interval_secs must be > 0"));
    }
    if cfg.link.attempts == 0 || cfg.link.handshake_attempts == 0 {
        return Err(ConfigError::ValidationFailed("link attempt counts must be > 0"));
    }
    if cfg.telemetry.max_points == 0 {
        return Err(ConfigError::ValidationFailed("telemetry max_points must be > 0"));
    }
    if cfg.telemetry.send_attempts == 0 {
        return Err(ConfigError::ValidationFailed("telemetry send_attempts must be > 0"));
    }
    if let Some(window) = cfg.refuel.window {
        if window.start_hour > 23 || window.end_hour > 23 || window.start_hour == window.end_hour {
            return Err(ConfigError::ValidationFailed(
                "refuel window hours must be 0-23 and distinct",
            ));
        }
    }
    Ok(())
}
