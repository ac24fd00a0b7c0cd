//! Integration tests for the ControlLoop → scheduler → outlets pipeline.
//!
//! The loop runs against [`MockOutlets`] and a [`SimClock`], so every
//! ignition pulse, settle delay and refuel poll advances simulated time
//! instead of blocking.

use heatctl::adapters::state_file::{JsonFileStore, MemoryStore};
use heatctl::adapters::time::SimClock;
use heatctl::app::ports::{Clock, ConfigPort, Feedback, NoHistory, UnitState};
use heatctl::app::service::ControlLoop;
use heatctl::config::SystemConfig;
use heatctl::error::{DriverError, Error, LinkError, SensorError};
use heatctl::scheduler::RefuelWindow;
use heatctl::state::StateStore;
use heatctl::telemetry::{
    NO_UNIT, OUTLET_HEALTH, SENSOR_HEALTH, TEMPERATURE, TelemetryPoint, UNIT_REMAINING,
    UNIT_RUNNING,
};

use crate::mock_hw::{FixedHistory, MockOutlets, RecordingSink};

type Loop = ControlLoop<MemoryStore, RecordingSink>;

fn make_loop(cfg: SystemConfig, clock: &SimClock) -> Loop {
    make_loop_with_sink(cfg, RecordingSink::new(), clock)
}

fn make_loop_with_sink(cfg: SystemConfig, sink: RecordingSink, clock: &SimClock) -> Loop {
    let store = StateStore::open(MemoryStore::with(cfg)).unwrap();
    ControlLoop::new(store, sink, clock)
}

fn with_unit(mut cfg: SystemConfig, name: &str, used: u32, running: bool) -> SystemConfig {
    let h = cfg.heaters.get_mut(name).unwrap();
    h.used = used;
    h.running = running;
    cfg
}

/// Everything measured so far, delivered or still buffered.
fn points(control: &Loop) -> Vec<TelemetryPoint> {
    let t = control.telemetry();
    t.sink().points.iter().chain(t.pending()).cloned().collect()
}

fn values(control: &Loop, measurement: &str, unit: &str) -> Vec<f64> {
    points(control)
        .into_iter()
        .filter(|p| p.measurement == measurement && p.unit == unit)
        .map(|p| p.value)
        .collect()
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn startup_commands_off_then_restores_running_units() {
    let clock = SimClock::new();
    let mut control = make_loop(with_unit(SystemConfig::default(), "heater_a", 120, true), &clock);
    let mut hw = MockOutlets::new(65.0);

    control.startup(&mut hw, &clock).unwrap();

    assert_eq!(hw.commands_for("heater_a"), vec![false, true]);
    assert_eq!(hw.commands_for("heater_b"), vec![false]);
    assert_eq!(hw.commands_for("heater_c"), vec![false]);
    assert!(control.heater("heater_a").unwrap().is_running());
    assert!(!control.heater("heater_b").unwrap().is_running());
}

// ── Scheduling ────────────────────────────────────────────────

#[test]
fn first_tick_schedules_immediately() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);
    control.startup(&mut hw, &clock).unwrap();

    let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();

    assert!(report.scheduled);
    assert!(report.probe_ok);
    assert_eq!(report.temperature, 55.0);
    assert_eq!(report.running, 3);
    assert_eq!(hw.on_count(), 3);

    // heater_b primes with two pulses before settling on.
    let b = hw.commands_for("heater_b");
    assert_eq!(&b[1..6], &[true, false, true, false, true]);
}

#[test]
fn warm_enough_turns_every_unit_off() {
    let clock = SimClock::new();
    let mut cfg = SystemConfig::default();
    for h in cfg.heaters.values_mut() {
        h.running = true;
    }
    let mut control = make_loop(cfg, &clock);
    let mut hw = MockOutlets::new(65.0);
    control.startup(&mut hw, &clock).unwrap();
    assert_eq!(hw.on_count(), 3);

    let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();

    assert_eq!(report.running, 0);
    assert_eq!(hw.on_count(), 0);
    for name in ["heater_a", "heater_b", "heater_c"] {
        assert_eq!(control.store().unit(name).map(|u| u.running), Some(false));
    }
}

#[test]
fn scheduling_waits_for_the_interval() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);

    let start = clock.now();
    assert!(control.tick(&mut hw, &mut NoHistory, &clock).unwrap().scheduled);
    assert!(!control.tick(&mut hw, &mut NoHistory, &clock).unwrap().scheduled);

    let mut rescheduled = false;
    for _ in 0..10 {
        let before = clock.now();
        if control.tick(&mut hw, &mut NoHistory, &clock).unwrap().scheduled {
            assert!(before - start >= chrono::TimeDelta::minutes(5));
            rescheduled = true;
            break;
        }
    }
    assert!(rescheduled, "a second scheduling pass should follow within ten ticks");
}

#[test]
fn maintenance_cycle_keeps_units_running() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);

    let mut cycled = false;
    for _ in 0..30 {
        if control.tick(&mut hw, &mut NoHistory, &clock).unwrap().cycled {
            cycled = true;
            break;
        }
    }

    assert!(cycled, "maintenance cycle should run within 30 ticks");
    assert_eq!(hw.on_count(), 3);
    assert!(control.heaters().iter().all(|h| h.is_running()));
}

// ── Temperature ───────────────────────────────────────────────

#[test]
fn probe_fault_falls_back_to_history() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(0.0);
    hw.temperature = Err(SensorError::Timeout);
    let mut history = FixedHistory::new(Some(52.0));

    let report = control.tick(&mut hw, &mut history, &clock).unwrap();

    assert!(!report.probe_ok);
    assert_eq!(report.temperature, 52.0);
    assert_eq!(history.queries, 1);
    assert_eq!(values(&control, SENSOR_HEALTH, NO_UNIT), vec![0.0]);
    assert_eq!(values(&control, TEMPERATURE, NO_UNIT), vec![52.0]);
}

#[test]
fn probe_fault_without_history_keeps_last_known() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(50.0);

    assert_eq!(control.tick(&mut hw, &mut NoHistory, &clock).unwrap().temperature, 50.0);

    hw.temperature = Err(SensorError::Invalid);
    let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    assert_eq!(report.temperature, 50.0);
    assert!(!report.probe_ok);
}

#[test]
fn second_probe_read_wins() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(70.0);
    hw.readings.extend([Ok(50.0), Ok(51.0)]);

    let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    assert_eq!(report.temperature, 51.0);
}

// ── Runtime accounting ────────────────────────────────────────

#[test]
fn exhausted_unit_is_forced_off_and_stays_off() {
    let clock = SimClock::new();
    let mut control = make_loop(with_unit(SystemConfig::default(), "heater_a", 598, true), &clock);
    let mut hw = MockOutlets::new(55.0);
    control.startup(&mut hw, &clock).unwrap();

    let mut stopped = false;
    for _ in 0..6 {
        control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
        if !control.heater("heater_a").unwrap().is_running() {
            stopped = true;
            break;
        }
    }
    assert!(stopped, "heater_a should run dry within six ticks");

    let a = control.heater("heater_a").unwrap();
    assert!(a.remaining() <= 0);
    assert!(!hw.is_on("heater_a"));
    assert_eq!(
        control.store().unit("heater_a"),
        Some(UnitState {
            used: a.used(),
            running: false
        })
    );

    // Not eligible any more: later scheduling passes leave it off.
    for _ in 0..8 {
        control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    }
    assert!(!control.heater("heater_a").unwrap().is_running());
    assert!(!hw.is_on("heater_a"));
    assert_eq!(hw.on_count(), 2);
}

// ── Failure monitor ───────────────────────────────────────────

#[test]
fn dead_outlet_triggers_one_link_recovery_after_threshold() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);
    hw.feedback.insert("heater_a".into(), Feedback::Inactive);

    let first = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    assert!(!first.recovered);
    assert!(control.monitor().failing_since("heater_a").is_some());

    let mut recovered = false;
    for _ in 0..8 {
        if control.tick(&mut hw, &mut NoHistory, &clock).unwrap().recovered {
            recovered = true;
            break;
        }
    }

    assert!(recovered);
    assert_eq!(hw.recoveries, 1);
    assert_eq!(control.monitor().recoveries(), 1);
    assert!(values(&control, OUTLET_HEALTH, "heater_a").iter().all(|v| *v == 0.0));
    assert!(values(&control, OUTLET_HEALTH, "heater_b").iter().all(|v| *v == 1.0));
}

// ── Refuel ────────────────────────────────────────────────────

#[test]
fn refuel_signal_resets_usage() {
    let clock = SimClock::new();
    let mut control = make_loop(with_unit(SystemConfig::default(), "heater_a", 300, false), &clock);
    let mut hw = MockOutlets::new(65.0);
    hw.refuel_presses = 1;

    let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();

    assert!(report.refueled);
    assert_eq!(control.heater("heater_a").unwrap().used(), 0);
    assert_eq!(control.store().unit("heater_a").map(|u| u.used), Some(0));

    let next = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    assert!(!next.refueled);
}

#[test]
fn refuel_window_fires_once_when_it_opens() {
    let clock = SimClock::new();
    let mut cfg = with_unit(SystemConfig::default(), "heater_c", 300, false);
    cfg.refuel.window = Some(RefuelWindow {
        start_hour: 3,
        end_hour: 4,
    });
    let mut control = make_loop(cfg, &clock);
    let mut hw = MockOutlets::new(65.0);

    clock.set_hour(Some(2));
    assert!(!control.tick(&mut hw, &mut NoHistory, &clock).unwrap().refueled);
    assert_eq!(control.heater("heater_c").unwrap().used(), 300);

    clock.set_hour(Some(3));
    assert!(control.tick(&mut hw, &mut NoHistory, &clock).unwrap().refueled);
    assert_eq!(control.heater("heater_c").unwrap().used(), 0);

    // Still inside the window: no second reset.
    assert!(!control.tick(&mut hw, &mut NoHistory, &clock).unwrap().refueled);

    // Unsynced clock never fires.
    clock.set_hour(None);
    assert!(!control.tick(&mut hw, &mut NoHistory, &clock).unwrap().refueled);
}

// ── Errors ────────────────────────────────────────────────────

#[test]
fn missing_board_ends_the_tick_with_a_fatal_error() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);
    hw.fail_outputs = Some(DriverError::Link(LinkError::NoDevice));

    let err = control.tick(&mut hw, &mut NoHistory, &clock).unwrap_err();
    assert_eq!(err, Error::Link(LinkError::NoDevice));
    assert!(err.is_fatal());
}

#[test]
fn unanswered_commands_do_not_stop_the_loop() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);
    hw.fail_outputs = Some(DriverError::NoResponse);

    let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    assert_eq!(report.running, 3);
    assert!(hw.calls.is_empty());
}

// ── Persistence ───────────────────────────────────────────────

#[test]
fn running_set_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    JsonFileStore::new(&path).save(&SystemConfig::default()).unwrap();
    let clock = SimClock::new();

    {
        let store = StateStore::open(JsonFileStore::new(&path)).unwrap();
        let mut control = ControlLoop::new(store, RecordingSink::new(), &clock);
        let mut hw = MockOutlets::new(55.0);
        control.startup(&mut hw, &clock).unwrap();
        assert_eq!(control.tick(&mut hw, &mut NoHistory, &clock).unwrap().running, 3);
    }

    let store = StateStore::open(JsonFileStore::new(&path)).unwrap();
    for name in ["heater_a", "heater_b", "heater_c"] {
        assert_eq!(store.unit(name).map(|u| u.running), Some(true));
    }

    let mut control = ControlLoop::new(store, RecordingSink::new(), &clock);
    let mut hw = MockOutlets::new(55.0);
    control.startup(&mut hw, &clock).unwrap();
    assert_eq!(hw.on_count(), 3);
    assert_eq!(hw.commands_for("heater_a"), vec![false, true]);
}

// ── Telemetry ─────────────────────────────────────────────────

#[test]
fn every_tick_reports_global_and_per_unit_points() {
    let clock = SimClock::new();
    let mut control = make_loop(SystemConfig::default(), &clock);
    let mut hw = MockOutlets::new(55.0);

    control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
    control.tick(&mut hw, &mut NoHistory, &clock).unwrap();

    assert!(control.telemetry().sink().batches >= 1, "flush interval has passed");
    assert_eq!(points(&control).len(), 2 * (2 + 3 * 3));
    assert_eq!(values(&control, TEMPERATURE, NO_UNIT), vec![55.0, 55.0]);
    for name in ["heater_a", "heater_b", "heater_c"] {
        assert_eq!(values(&control, UNIT_RUNNING, name).len(), 2);
        assert_eq!(values(&control, UNIT_REMAINING, name).len(), 2);
        assert_eq!(values(&control, OUTLET_HEALTH, name), vec![1.0, 1.0]);
    }
}

#[test]
fn unreachable_metrics_store_never_blocks_heating() {
    let clock = SimClock::new();
    let mut cfg = SystemConfig::default();
    cfg.telemetry.max_points = 5;
    let sink = RecordingSink {
        reachable: false,
        ..RecordingSink::default()
    };
    let mut control = make_loop_with_sink(cfg, sink, &clock);
    let mut hw = MockOutlets::new(55.0);

    for _ in 0..5 {
        let report = control.tick(&mut hw, &mut NoHistory, &clock).unwrap();
        assert_eq!(report.running, 3);
        assert!(control.telemetry().len() <= 5);
    }
    assert!(control.telemetry().dropped() > 0);
    assert!(control.telemetry().sink().points.is_empty());
}
