//! Application service — the hexagonal core.
//!
//! [`ControlLoop`] owns the heating units, the scheduling policy, the
//! failure monitor, the temperature reader, the telemetry batcher and the
//! persisted state.  The outlet driver, the history port and the clock are
//! injected at call sites, so the whole loop runs against mock adapters in
//! tests.
//!
//! ```text
//!  OutletDriver ◀─▶ ┌──────────────────────────────┐ ──▶ MetricsSink
//!                   │         ControlLoop          │
//!   HistoryPort ──▶ │ Scheduler · Monitor · Units  │ ◀─▶ ConfigPort
//!         Clock ──▶ └──────────────────────────────┘
//! ```
//!
//! ## Tick
//!
//! 1. Read temperature (probe, history, last known).
//! 2. Emit the temperature metric.
//! 3. Every `schedule_interval`: scheduling pass.
//! 4. Every `cycle_interval`: maintenance cycles.
//! 5. Failure monitor.
//! 6. Runtime accrual (may force units off).
//! 7. Re-assert every outlet from its `running` flag.
//! 8. Refuel check: daily window, then the manual signal.  The signal poll
//!    blocks for `refuel_poll_secs` and paces the loop.

use std::convert::Infallible;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::config::{IgnitionConfig, TimingConfig};
use crate::drivers::heater::{HeaterContext, HeaterResource};
use crate::error::Result;
use crate::monitor::FailureMonitor;
use crate::scheduler::{RefuelSchedule, SchedulingPolicy};
use crate::sensors::TemperatureReader;
use crate::state::StateStore;
use crate::telemetry::{
    NO_UNIT, SENSOR_HEALTH, TEMPERATURE, TelemetryBatcher, UNIT_REMAINING, UNIT_RUNNING,
};

use super::ports::{Clock, ConfigPort, HistoryPort, MetricsSink, OutletDriver};

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub temperature: f32,
    pub probe_ok: bool,
    pub scheduled: bool,
    pub cycled: bool,
    pub recovered: bool,
    pub refueled: bool,
    pub running: usize,
}

// ───────────────────────────────────────────────────────────────
// ControlLoop
// ───────────────────────────────────────────────────────────────

pub struct ControlLoop<P: ConfigPort, S: MetricsSink> {
    heaters: Vec<HeaterResource>,
    policy: SchedulingPolicy,
    monitor: FailureMonitor,
    reader: TemperatureReader,
    telemetry: TelemetryBatcher<S>,
    store: StateStore<P>,
    refuel: RefuelSchedule,
    ignition: IgnitionConfig,
    timing: TimingConfig,
    last_schedule_at: Option<DateTime<Utc>>,
    last_cycle_at: DateTime<Utc>,
    tick_count: u64,
}

impl<P: ConfigPort, S: MetricsSink> ControlLoop<P, S> {
    /// Build the loop from the persisted document.
    ///
    /// Does **not** touch the hardware — call [`startup`](Self::startup)
    /// next.  The first tick schedules immediately; the first maintenance
    /// cycle waits one full `cycle_interval`.
    pub fn new(store: StateStore<P>, sink: S, clock: &dyn Clock) -> Self {
        let cfg = store.config();
        let heaters = cfg
            .heaters
            .iter()
            .map(|(name, h)| HeaterResource::from_config(name, h))
            .collect();
        let now = clock.now();

        Self {
            heaters,
            policy: SchedulingPolicy::new(cfg.scheduling.clone(), cfg.timing.schedule_interval_mins()),
            monitor: FailureMonitor::new(cfg.timing.failure_threshold()),
            reader: TemperatureReader::new(&cfg.sensor),
            telemetry: TelemetryBatcher::new(sink, &cfg.telemetry, now),
            refuel: RefuelSchedule::new(cfg.refuel.window),
            ignition: cfg.ignition.clone(),
            timing: cfg.timing.clone(),
            last_schedule_at: None,
            last_cycle_at: now,
            tick_count: 0,
            store,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Command every unit off, then restart the ones persisted as running.
    pub fn startup(&mut self, driver: &mut dyn OutletDriver, clock: &dyn Clock) -> Result<()> {
        info!("Starting {} heaters...", self.heaters.len());
        let mut ctx = HeaterContext {
            driver,
            state: &mut self.store,
            clock,
            ignition: &self.ignition,
        };
        for heater in &mut self.heaters {
            heater.startup(&mut ctx)?;
        }
        Ok(())
    }

    /// Start up and tick until a fatal error.
    pub fn run(
        &mut self,
        driver: &mut dyn OutletDriver,
        history: &mut dyn HistoryPort,
        clock: &dyn Clock,
    ) -> Result<Infallible> {
        self.startup(driver, clock)?;
        loop {
            self.tick(driver, history, clock)?;
        }
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one full control cycle.  Only fatal errors are returned.
    pub fn tick(
        &mut self,
        driver: &mut dyn OutletDriver,
        history: &mut dyn HistoryPort,
        clock: &dyn Clock,
    ) -> Result<TickReport> {
        self.tick_count += 1;
        let now = clock.now();

        // 1–2. Temperature
        let reading = self.reader.read(driver, history, clock)?;
        let temp = reading.fahrenheit;
        info!("Current temp: {:.1}°F", temp);
        let health = if reading.probe_ok() { 1.0 } else { 0.0 };
        self.telemetry.measure(SENSOR_HEALTH, NO_UNIT, health, clock);
        self.telemetry.measure(TEMPERATURE, NO_UNIT, f64::from(temp), clock);

        let mut ctx = HeaterContext {
            driver,
            state: &mut self.store,
            clock,
            ignition: &self.ignition,
        };

        // 3. Scheduling pass
        let scheduled = self
            .last_schedule_at
            .is_none_or(|t| now - t >= self.timing.schedule_interval());
        if scheduled {
            self.last_schedule_at = Some(now);
            for h in &self.heaters {
                info!(
                    "{} has {} minutes of runtime remaining. Currently running? {}",
                    h.name(),
                    h.remaining(),
                    h.is_running()
                );
            }
            self.policy.run(temp, &mut self.heaters, &mut ctx)?;
        }

        // 4. Maintenance cycles
        let cycled = now - self.last_cycle_at >= self.timing.cycle_interval();
        if cycled {
            self.last_cycle_at = now;
            for heater in &mut self.heaters {
                heater.maintenance_cycle(&mut ctx)?;
            }
        }

        // 5. Failure monitor
        let recovered = self
            .monitor
            .check(&self.heaters, ctx.driver, &mut self.telemetry, clock)?;

        // 6. Runtime accrual
        for heater in &mut self.heaters {
            let running = if heater.is_running() { 1.0 } else { 0.0 };
            self.telemetry.measure(UNIT_RUNNING, heater.name(), running, clock);
            heater.accrue_runtime(&mut ctx)?;
            self.telemetry
                .measure(UNIT_REMAINING, heater.name(), heater.remaining() as f64, clock);
        }

        // 7. Self-heal outlet state
        for heater in &mut self.heaters {
            heater.force_sync(&mut ctx)?;
        }

        // 8. Refuel
        let scheduled_refuel = self.refuel.poll(clock.current_hour());
        let manual_refuel = ctx.driver.check_refuel_signal(
            clock,
            Duration::from_secs(u64::from(self.timing.refuel_poll_secs)),
            Duration::from_secs(u64::from(self.timing.refuel_poll_interval_secs)),
        )?;
        let refueled = scheduled_refuel || manual_refuel;
        if refueled {
            info!(
                "Resetting fuel levels ({})",
                if manual_refuel { "refuel signal" } else { "refuel window" }
            );
            for heater in &mut self.heaters {
                heater.refuel(&mut ctx);
            }
        }

        let running = self.heaters.iter().filter(|h| h.is_running()).count();
        if running == 0 && temp < self.policy.config().setpoint {
            error!("Below setpoint with no heaters running");
        }

        Ok(TickReport {
            temperature: temp,
            probe_ok: reading.probe_ok(),
            scheduled,
            cycled,
            recovered,
            refueled,
            running,
        })
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn heaters(&self) -> &[HeaterResource] {
        &self.heaters
    }

    pub fn heater(&self, name: &str) -> Option<&HeaterResource> {
        self.heaters.iter().find(|h| h.name() == name)
    }

    pub fn telemetry(&self) -> &TelemetryBatcher<S> {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut TelemetryBatcher<S> {
        &mut self.telemetry
    }

    pub fn store(&self) -> &StateStore<P> {
        &self.store
    }

    pub fn monitor(&self) -> &FailureMonitor {
        &self.monitor
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}
