//! Integration tests for ControlLoop → DeviceProtocol → emulated board.
//!
//! These exercise the real byte protocol and recovery ladder end to end:
//! outlet echoes, feedback digits, temperature parsing, refuel polling,
//! and escalation to a fatal error when the board disappears.

use heatctl::adapters::state_file::MemoryStore;
use heatctl::adapters::time::SimClock;
use heatctl::app::ports::NoHistory;
use heatctl::app::service::ControlLoop;
use heatctl::config::SystemConfig;
use heatctl::drivers::link::DeviceProtocol;
use heatctl::error::{Error, LinkError};
use heatctl::state::StateStore;

use crate::mock_hw::{MockBoard, RecordingSink};

fn connect<'c>(board: &MockBoard, cfg: &SystemConfig, clock: &'c SimClock) -> DeviceProtocol<MockBoard, &'c SimClock> {
    DeviceProtocol::connect(board.clone(), clock, &cfg.link, &cfg.heaters).unwrap()
}

fn make_loop(cfg: SystemConfig, clock: &SimClock) -> ControlLoop<MemoryStore, RecordingSink> {
    let store = StateStore::open(MemoryStore::with(cfg)).unwrap();
    ControlLoop::new(store, RecordingSink::new(), clock)
}

#[test]
fn cold_tick_switches_board_outlets_on() {
    let clock = SimClock::new();
    let cfg = SystemConfig::default();
    let board = MockBoard::new(55.0);
    let mut driver = connect(&board, &cfg, &clock);
    let mut control = make_loop(cfg, &clock);

    control.startup(&mut driver, &clock).unwrap();
    let report = control.tick(&mut driver, &mut NoHistory, &clock).unwrap();

    assert!(report.probe_ok);
    assert_eq!(report.temperature, 55.0);
    assert_eq!(report.running, 3);
    for letter in ['a', 'b', 'c'] {
        assert!(board.outlet_on(letter), "outlet {letter} should be energised");
    }
    assert_eq!(control.monitor().failing_count(), 0);
    assert_eq!(driver.recoveries(), 0);
}

#[test]
fn warm_tick_leaves_board_outlets_off() {
    let clock = SimClock::new();
    let cfg = SystemConfig::default();
    let board = MockBoard::new(66.5);
    let mut driver = connect(&board, &cfg, &clock);
    let mut control = make_loop(cfg, &clock);

    control.startup(&mut driver, &clock).unwrap();
    let report = control.tick(&mut driver, &mut NoHistory, &clock).unwrap();

    assert_eq!(report.temperature, 66.5);
    assert_eq!(report.running, 0);
    assert!(!board.outlet_on('a'));
    assert!(!board.outlet_on('b'));
    assert!(!board.outlet_on('c'));
}

#[test]
fn board_refuel_button_resets_usage() {
    let clock = SimClock::new();
    let mut cfg = SystemConfig::default();
    cfg.heaters.get_mut("heater_b").unwrap().used = 200;
    let board = MockBoard::new(66.0);
    let mut driver = connect(&board, &cfg, &clock);
    let mut control = make_loop(cfg, &clock);

    board.0.borrow_mut().refuel_pressed = true;
    let report = control.tick(&mut driver, &mut NoHistory, &clock).unwrap();

    assert!(report.refueled);
    assert_eq!(control.heater("heater_b").unwrap().used(), 0);
}

#[test]
fn dead_feedback_channel_restarts_the_link() {
    let clock = SimClock::new();
    let cfg = SystemConfig::default();
    let board = MockBoard::new(55.0);
    // Feedback digit 1 now reports on an outlet nobody drives.
    board.0.borrow_mut().feedback_map.insert(b'1', b'z');
    let mut driver = connect(&board, &cfg, &clock);
    let mut control = make_loop(cfg, &clock);
    let opens_before = board.0.borrow().opens;

    let mut recovered = false;
    for _ in 0..8 {
        if control.tick(&mut driver, &mut NoHistory, &clock).unwrap().recovered {
            recovered = true;
            break;
        }
    }

    assert!(recovered);
    assert_eq!(driver.recoveries(), 1);
    assert!(board.0.borrow().opens > opens_before);
    // The link came back; heating carried on.
    assert!(board.outlet_on('b'));
}

#[test]
fn unplugged_board_is_fatal() {
    let clock = SimClock::new();
    let cfg = SystemConfig::default();
    let board = MockBoard::new(55.0);
    let mut driver = connect(&board, &cfg, &clock);
    let mut control = make_loop(cfg, &clock);
    control.tick(&mut driver, &mut NoHistory, &clock).unwrap();

    board.unplug();
    let err = control.tick(&mut driver, &mut NoHistory, &clock).unwrap_err();

    assert_eq!(err, Error::Link(LinkError::NoDevice));
    assert!(err.is_fatal());
}

#[test]
fn connect_without_any_node_is_fatal() {
    let clock = SimClock::new();
    let cfg = SystemConfig::default();
    let board = MockBoard::new(55.0);
    board.0.borrow_mut().nodes.clear();

    let result = DeviceProtocol::connect(board.clone(), &clock, &cfg.link, &cfg.heaters);
    assert!(matches!(result, Err(LinkError::NoDevice)));
}
