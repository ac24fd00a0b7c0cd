//! Heating unit model: runtime budget, ignition and maintenance cycling.
//!
//! A [`HeaterResource`] is a dumb actuator with a fuel gauge.  It knows how
//! to switch itself through an [`OutletDriver`], how much runtime it has
//! left, and how it compares to another unit for scheduling purposes.
//! Deciding *which* units run is the scheduler's job.
//!
//! ## State contract
//!
//! `running` is the intended hardware state.  It is persisted on every
//! change, and [`HeaterResource::force_sync`] re-asserts it on the outlet
//! once per tick, so a dropped command heals itself.
//!
//! Driver errors are logged and absorbed here, except fatal ones, which
//! are returned so the control loop can escalate.

use core::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info, warn};

use crate::app::ports::{Clock, OutletDriver, StatePort, UnitState};
use crate::config::{HeaterConfig, IgnitionConfig};
use crate::error::DriverError;

/// How the unit is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnitionMode {
    /// One "on" command.
    Simple,
    /// On/off priming pulses before settling on.
    MultiPulse,
}

/// Everything a unit touches while switching.
pub struct HeaterContext<'a> {
    pub driver: &'a mut dyn OutletDriver,
    pub state: &'a mut dyn StatePort,
    pub clock: &'a dyn Clock,
    pub ignition: &'a IgnitionConfig,
}

/// Result of [`HeaterResource::accrue_runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accrual {
    /// Not running; nothing to account.
    Idle,
    /// Whole minutes added to `used`.
    Accrued(u32),
    /// Budget exhausted; the unit was forced off.
    Exhausted,
}

pub struct HeaterResource {
    name: String,
    capacity: u32,
    used: u32,
    running: bool,
    active_since: Option<DateTime<Utc>>,
    ignition: IgnitionMode,
    cycle: bool,
}

impl HeaterResource {
    pub fn from_config(name: &str, config: &HeaterConfig) -> Self {
        Self {
            name: name.to_owned(),
            capacity: config.capacity,
            used: config.used,
            running: config.running,
            active_since: None,
            ignition: if config.multistart {
                IgnitionMode::MultiPulse
            } else {
                IgnitionMode::Simple
            },
            cycle: config.cycle,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// Minutes left before a mandatory refuel.  May go negative.
    pub fn remaining(&self) -> i64 {
        i64::from(self.capacity) - i64::from(self.used)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        self.active_since
    }

    pub fn ignition(&self) -> IgnitionMode {
        self.ignition
    }

    pub fn cycles(&self) -> bool {
        self.cycle
    }

    pub fn state(&self) -> UnitState {
        UnitState {
            used: self.used,
            running: self.running,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Bring the hardware in line with the persisted intent after a restart:
    /// command off, then start again (with ignition) if it was running.
    pub fn startup(&mut self, ctx: &mut HeaterContext<'_>) -> Result<(), DriverError> {
        info!("{} should be running? {}", self.name, self.running);
        self.command(ctx, false)?;
        if self.running {
            self.running = false;
            self.turn_on(ctx)?;
        }
        Ok(())
    }

    /// Start the unit.  No-op if it is already running.
    pub fn turn_on(&mut self, ctx: &mut HeaterContext<'_>) -> Result<(), DriverError> {
        if self.running {
            return Ok(());
        }
        info!("{} is STARTING", self.name);
        self.active_since = Some(ctx.clock.now());
        self.running = true;
        self.persist(ctx);

        if self.ignition == IgnitionMode::MultiPulse {
            let pulses = ctx.ignition.pulses;
            self.pulse(ctx, pulses)?;
        }
        self.command(ctx, true)?;
        ctx.clock.sleep(ctx.ignition.settle());
        info!("{} is ON", self.name);
        Ok(())
    }

    /// Stop the unit and account the runtime since it was started.
    pub fn turn_off(&mut self, ctx: &mut HeaterContext<'_>) -> Result<(), DriverError> {
        let commanded = self.command(ctx, false);
        self.running = false;
        if let Some(since) = self.active_since.take() {
            let minutes = whole_minutes(ctx.clock.now() - since);
            self.used = self.used.saturating_add(minutes);
        }
        self.persist(ctx);
        info!("{} is OFF", self.name);
        commanded
    }

    /// Fold elapsed runtime into `used`; force the unit off when the budget
    /// is gone.  Sub-minute remainders carry over to the next call.
    pub fn accrue_runtime(&mut self, ctx: &mut HeaterContext<'_>) -> Result<Accrual, DriverError> {
        if !self.running {
            return Ok(Accrual::Idle);
        }
        let now = ctx.clock.now();
        let since = *self.active_since.get_or_insert(now);
        let minutes = whole_minutes(now - since);
        if minutes > 0 {
            self.used = self.used.saturating_add(minutes);
            self.active_since = Some(since + TimeDelta::minutes(i64::from(minutes)));
            self.persist(ctx);
        }

        if self.remaining() <= 0 {
            error!("{} shutting off because runtime exceeded", self.name);
            self.turn_off(ctx)?;
            return Ok(Accrual::Exhausted);
        }
        Ok(Accrual::Accrued(minutes))
    }

    /// Anti-fouling cycle: off, pause, priming pulses, back on.  Only runs
    /// for cycling units that are currently running.  Returns whether it ran.
    pub fn maintenance_cycle(&mut self, ctx: &mut HeaterContext<'_>) -> Result<bool, DriverError> {
        if !(self.cycle && self.running) {
            return Ok(false);
        }
        info!("{} is CYCLING", self.name);
        self.command(ctx, false)?;
        ctx.clock.sleep(ctx.ignition.pulse_off());
        let pulses = ctx.ignition.cycle_pulses;
        self.pulse(ctx, pulses)?;
        self.command(ctx, true)?;
        info!("{} is RUNNING", self.name);
        ctx.clock.sleep(ctx.ignition.pulse_off());
        Ok(true)
    }

    /// Re-assert the outlet from the `running` flag.
    pub fn force_sync(&mut self, ctx: &mut HeaterContext<'_>) -> Result<(), DriverError> {
        self.command(ctx, self.running)
    }

    /// Reset usage to zero (physical refuel).
    pub fn refuel(&mut self, ctx: &mut HeaterContext<'_>) {
        self.used = 0;
        if self.running {
            self.active_since = Some(ctx.clock.now());
        }
        self.persist(ctx);
    }

    // ── Internal ──────────────────────────────────────────────

    fn pulse(&self, ctx: &mut HeaterContext<'_>, count: u32) -> Result<(), DriverError> {
        for _ in 0..count {
            self.command(ctx, true)?;
            ctx.clock.sleep(ctx.ignition.pulse_on());
            self.command(ctx, false)?;
            ctx.clock.sleep(ctx.ignition.pulse_off());
        }
        Ok(())
    }

    fn command(&self, ctx: &mut HeaterContext<'_>, on: bool) -> Result<(), DriverError> {
        match ctx.driver.set_output(&self.name, on) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("{} outlet {} failed: {}", self.name, if on { "on" } else { "off" }, e);
                Ok(())
            }
        }
    }

    fn persist(&self, ctx: &mut HeaterContext<'_>) {
        if let Err(e) = ctx.state.persist(&self.name, self.state()) {
            warn!("{} state not persisted: {}", self.name, e);
        }
    }
}

impl core::fmt::Debug for HeaterResource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}: ({}/{}) {}",
            self.name,
            self.remaining(),
            self.capacity,
            if self.running { "On" } else { "Off" }
        )
    }
}

fn whole_minutes(elapsed: TimeDelta) -> u32 {
    elapsed.num_minutes().clamp(0, i64::from(u32::MAX)) as u32
}

// ═══════════════════════════════════════════════════════════════
//  Fairness ordering
// ═══════════════════════════════════════════════════════════════

/// Where `a` goes relative to `b` in the run queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    /// `a` is preferred to run.
    Before,
    After,
    Equal,
}

impl Preference {
    pub fn to_ordering(self) -> Ordering {
        match self {
            Self::Before => Ordering::Less,
            Self::After => Ordering::Greater,
            Self::Equal => Ordering::Equal,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
            Self::Equal => Self::Equal,
        }
    }
}

/// Canonical three-way run preference.
///
/// 1. A remaining-runtime gap above `balance_threshold` minutes wins
///    outright: the unit with more left goes first.
/// 2. Otherwise a running unit goes before a stopped one.
/// 3. Otherwise the larger capacity goes first.
pub fn compare_preference(a: &HeaterResource, b: &HeaterResource, balance_threshold: u32) -> Preference {
    if (a.remaining() - b.remaining()).abs() > i64::from(balance_threshold) {
        return if a.remaining() > b.remaining() {
            Preference::Before
        } else {
            Preference::After
        };
    }
    match (a.running, b.running) {
        (true, false) => return Preference::Before,
        (false, true) => return Preference::After,
        _ => {}
    }
    match a.capacity.cmp(&b.capacity) {
        Ordering::Greater => Preference::Before,
        Ordering::Less => Preference::After,
        Ordering::Equal => Preference::Equal,
    }
}

/// Indices of `units` ordered most-preferred first, ties broken by name.
///
/// The threshold rule is not transitive (A≈B, B≈C, A≫C), which the std
/// sorts are allowed to panic on, so this is a plain stable insertion sort.
pub fn rank_units(units: &[HeaterResource], balance_threshold: u32) -> Vec<usize> {
    let cmp = |a: usize, b: usize| {
        match compare_preference(&units[a], &units[b], balance_threshold) {
            Preference::Equal => units[a].name.cmp(&units[b].name),
            p => p.to_ordering(),
        }
    };

    let mut order: Vec<usize> = Vec::with_capacity(units.len());
    for idx in 0..units.len() {
        let pos = order
            .iter()
            .position(|&placed| cmp(idx, placed) == Ordering::Less)
            .unwrap_or(order.len());
        order.insert(pos, idx);
    }
    order
}
