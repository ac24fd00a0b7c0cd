//! Scheduling policy: how many heaters should run, and which ones.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ControlLoop                           │
//! │                                                              │
//! │   temperature ──▶ desired_count ──┐                          │
//! │                                   ▼                          │
//! │   heaters ──▶ eligible_units ──▶ apply_demand ──▶ turn_on /  │
//! │              (ranked by the       (start most-    turn_off   │
//! │               fairness order)      preferred,                │
//! │                                    stop least)               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The demand function is configuration ([`DemandFunction`]), not code,
//! and so is whether an exact count match still reshuffles the running set
//! onto the most-preferred units (`reconcile_on_match`).
//!
//! The daily refuel window lives here too: it is a time-of-day schedule
//! like any other, just one that resets usage instead of running heaters.

use core::cmp::Ordering;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::config::{DemandFunction, SchedulingConfig};
use crate::drivers::heater::{HeaterContext, HeaterResource, rank_units};
use crate::error::DriverError;

// ═══════════════════════════════════════════════════════════════
//  Scheduling policy
// ═══════════════════════════════════════════════════════════════

pub struct SchedulingPolicy {
    config: SchedulingConfig,
    /// Units with no more than this many minutes left are not started.
    horizon_mins: i64,
}

impl SchedulingPolicy {
    pub fn new(config: SchedulingConfig, horizon_mins: i64) -> Self {
        Self {
            config,
            horizon_mins,
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Number of units that should run at `temp` (°F), in `0..=total`.
    pub fn desired_count(&self, temp: f32, total: usize) -> usize {
        let setpoint = self.config.setpoint;
        if temp >= setpoint {
            return 0;
        }
        match &self.config.demand {
            DemandFunction::Linear => {
                let tolerance = self.config.tolerance;
                let deficit = (setpoint - temp).min(tolerance);
                let needed = (deficit / tolerance * total as f32).round();
                if needed.is_nan() || needed <= 0.0 {
                    0
                } else {
                    (needed as usize).min(total)
                }
            }
            DemandFunction::Table { steps } => steps
                .iter()
                .find(|step| step.threshold >= temp)
                .map_or(0, |step| step.units.min(total)),
        }
    }

    /// Units that may run this interval, most preferred first.
    ///
    /// A running unit is always eligible, even with little runtime left:
    /// it finishes the interval and accrual stops it if it runs dry.
    pub fn eligible_units(&self, heaters: &[HeaterResource]) -> Vec<usize> {
        rank_units(heaters, self.config.balance_threshold_mins)
            .into_iter()
            .filter(|&i| heaters[i].is_running() || heaters[i].remaining() > self.horizon_mins)
            .collect()
    }

    /// Move the running set toward `desired` units drawn from `eligible`.
    ///
    /// Returns the number of running units afterwards.
    pub fn apply_demand(
        &self,
        desired: usize,
        eligible: &[usize],
        heaters: &mut [HeaterResource],
        ctx: &mut HeaterContext<'_>,
    ) -> Result<usize, DriverError> {
        let mut desired = desired;
        if eligible.len() < desired {
            error!(
                "Shortfall: {} heaters needed but only {} eligible",
                desired,
                eligible.len()
            );
            desired = eligible.len();
        }

        let running = heaters.iter().filter(|h| h.is_running()).count();
        info!("Heaters running: {}, desired: {}", running, desired);

        match running.cmp(&desired) {
            Ordering::Less => {
                let starts: Vec<usize> = eligible
                    .iter()
                    .copied()
                    .filter(|&i| !heaters[i].is_running())
                    .take(desired - running)
                    .collect();
                for i in starts {
                    heaters[i].turn_on(ctx)?;
                }
            }
            Ordering::Greater => {
                let stops: Vec<usize> = eligible
                    .iter()
                    .rev()
                    .copied()
                    .filter(|&i| heaters[i].is_running())
                    .take(running - desired)
                    .collect();
                for i in stops {
                    heaters[i].turn_off(ctx)?;
                }
            }
            Ordering::Equal if self.config.reconcile_on_match => {
                let (preferred, rest) = eligible.split_at(desired);
                for &i in preferred {
                    if !heaters[i].is_running() {
                        info!("Rebalancing: starting {}", heaters[i].name());
                        heaters[i].turn_on(ctx)?;
                    }
                }
                for &i in rest {
                    if heaters[i].is_running() {
                        info!("Rebalancing: stopping {}", heaters[i].name());
                        heaters[i].turn_off(ctx)?;
                    }
                }
            }
            Ordering::Equal => {}
        }

        Ok(heaters.iter().filter(|h| h.is_running()).count())
    }

    /// One full scheduling pass at `temp`.
    pub fn run(
        &self,
        temp: f32,
        heaters: &mut [HeaterResource],
        ctx: &mut HeaterContext<'_>,
    ) -> Result<usize, DriverError> {
        let desired = self.desired_count(temp, heaters.len());
        let eligible = self.eligible_units(heaters);
        info!(
            "Schedule: {:.1}°F (setpoint {:.1}) -> {} heaters, {} eligible",
            temp,
            self.config.setpoint,
            desired,
            eligible.len()
        );
        self.apply_demand(desired, &eligible, heaters, ctx)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Refuel window
// ═══════════════════════════════════════════════════════════════

/// Daily time-of-day window in which usage is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefuelWindow {
    /// Start hour (0-23 inclusive).
    pub start_hour: u8,
    /// End hour (0-23 exclusive).
    pub end_hour: u8,
}

impl RefuelWindow {
    pub fn is_open(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Wraps around midnight, e.g. 23..2
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Fires once each time the window opens.
///
/// The first observation only records the state, so a restart inside an
/// open window does not reset usage a second time that day.
#[derive(Debug, Default)]
pub struct RefuelSchedule {
    window: Option<RefuelWindow>,
    was_open: Option<bool>,
}

impl RefuelSchedule {
    pub fn new(window: Option<RefuelWindow>) -> Self {
        if let Some(w) = window {
            info!("Refuel window {}:00–{}:00", w.start_hour, w.end_hour);
        }
        Self {
            window,
            was_open: None,
        }
    }

    /// Feed the current hour; true on the tick the window opens.
    /// An unsynced wall clock (`None`) never fires.
    pub fn poll(&mut self, current_hour: Option<u8>) -> bool {
        let (Some(window), Some(hour)) = (self.window, current_hour) else {
            return false;
        };
        let open = window.is_open(hour);
        let fired = open && self.was_open == Some(false);
        self.was_open = Some(open);
        fired
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
