//! Time adapters.
//!
//! - [`SystemClock`] is the wall clock: `chrono::Utc` for timestamps,
//!   `std::thread::sleep` for delays, local time for the hour-of-day.
//! - [`SimClock`] is a simulated clock whose `sleep` advances time
//!   instantly, for tests and dry runs.

use std::cell::Cell;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone, Timelike, Utc};

use crate::app::ports::Clock;

/// Reject obviously unsynced wall time (e.g. before 2020-01-01).
const EPOCH_2020: i64 = 1_577_836_800;

/// Real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn current_hour(&self) -> Option<u8> {
        let now = Local::now();
        if now.timestamp() < EPOCH_2020 {
            return None;
        }
        u8::try_from(now.hour()).ok()
    }
}

/// Simulated time.  `sleep` returns immediately after moving the clock.
///
/// The hour-of-day is derived from the simulated UTC time unless pinned
/// with [`SimClock::set_hour`].
#[derive(Debug)]
pub struct SimClock {
    now: Cell<DateTime<Utc>>,
    pinned_hour: Cell<Option<Option<u8>>>,
    slept: Cell<Duration>,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    /// Starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Self::starting_at(start)
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(start),
            pinned_hour: Cell::new(None),
            slept: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let step = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        self.now.set(self.now.get() + step);
    }

    /// Pin the reported hour-of-day (`None` = unsynced wall clock).
    pub fn set_hour(&self, hour: Option<u8>) {
        self.pinned_hour.set(Some(hour));
    }

    /// Follow the simulated time again after [`SimClock::set_hour`].
    pub fn clear_hour(&self) {
        self.pinned_hour.set(None);
    }

    /// Total time spent in [`Clock::sleep`].
    pub fn slept(&self) -> Duration {
        self.slept.get()
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + duration);
        self.advance(duration);
    }

    fn current_hour(&self) -> Option<u8> {
        match self.pinned_hour.get() {
            Some(pinned) => pinned,
            None => u8::try_from(self.now.get().hour()).ok(),
        }
    }
}
