//! Mock hardware adapters for integration tests.
//!
//! [`MockOutlets`] records every outlet command so tests can assert on the
//! full command history without a board attached.  [`MockBoard`] emulates
//! the serial outlet board byte for byte, for tests that run the real
//! link protocol.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use heatctl::app::ports::{Feedback, HistoryPort, MetricsSink, OutletDriver};
use heatctl::drivers::link::{DeviceNode, LinkBackend, SerialLink};
use heatctl::error::{DriverError, LinkError, SensorError, SinkError};
use heatctl::telemetry::TelemetryPoint;

// ── MockOutlets ───────────────────────────────────────────────

pub struct MockOutlets {
    /// Every `set_output` call in order.
    pub calls: Vec<(String, bool)>,
    /// Last commanded state per unit.
    pub outputs: BTreeMap<String, bool>,
    /// Per-unit feedback override; otherwise feedback mirrors the output.
    pub feedback: BTreeMap<String, Feedback>,
    /// Probe answers, consumed front first; `temperature` once empty.
    pub readings: VecDeque<Result<f32, SensorError>>,
    pub temperature: Result<f32, SensorError>,
    /// Refuel signal presses still to be reported.
    pub refuel_presses: u32,
    pub recoveries: u32,
    /// Answer every outlet command with this error.
    pub fail_outputs: Option<DriverError>,
}

#[allow(dead_code)]
impl MockOutlets {
    pub fn new(temperature: f32) -> Self {
        Self {
            calls: Vec::new(),
            outputs: BTreeMap::new(),
            feedback: BTreeMap::new(),
            readings: VecDeque::new(),
            temperature: Ok(temperature),
            refuel_presses: 0,
            recoveries: 0,
            fail_outputs: None,
        }
    }

    pub fn is_on(&self, unit: &str) -> bool {
        self.outputs.get(unit).copied().unwrap_or(false)
    }

    pub fn on_count(&self) -> usize {
        self.outputs.values().filter(|on| **on).count()
    }

    pub fn commands_for(&self, unit: &str) -> Vec<bool> {
        self.calls
            .iter()
            .filter(|(name, _)| name == unit)
            .map(|(_, on)| *on)
            .collect()
    }
}

impl OutletDriver for MockOutlets {
    fn set_output(&mut self, unit: &str, on: bool) -> Result<(), DriverError> {
        if let Some(e) = self.fail_outputs {
            return Err(e);
        }
        self.calls.push((unit.to_owned(), on));
        self.outputs.insert(unit.to_owned(), on);
        Ok(())
    }

    fn read_feedback(&mut self, unit: &str) -> Result<Feedback, DriverError> {
        if let Some(f) = self.feedback.get(unit) {
            return Ok(*f);
        }
        Ok(if self.is_on(unit) {
            Feedback::Active
        } else {
            Feedback::Inactive
        })
    }

    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        self.readings.pop_front().unwrap_or(self.temperature)
    }

    fn refuel_signal(&mut self) -> Result<bool, DriverError> {
        if self.refuel_presses > 0 {
            self.refuel_presses -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn recover_link(&mut self) -> Result<(), LinkError> {
        self.recoveries += 1;
        Ok(())
    }
}

// ── Metrics ───────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub points: Vec<TelemetryPoint>,
    pub batches: u32,
    pub reachable: bool,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }
}

impl MetricsSink for RecordingSink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        if !self.reachable {
            return Err(SinkError::Unreachable);
        }
        self.batches += 1;
        self.points.extend_from_slice(points);
        Ok(())
    }
}

/// History store with one fixed answer.
pub struct FixedHistory {
    pub value: Option<f64>,
    pub queries: u32,
}

#[allow(dead_code)]
impl FixedHistory {
    pub fn new(value: Option<f64>) -> Self {
        Self { value, queries: 0 }
    }
}

impl HistoryPort for FixedHistory {
    fn latest_value(&mut self, _measurement: &str, _location: &str, _window: Duration) -> Option<f64> {
        self.queries += 1;
        self.value
    }
}

// ── MockBoard ─────────────────────────────────────────────────

/// Emulated outlet board state.
pub struct BoardState {
    pub nodes: Vec<DeviceNode>,
    /// Outlet letter (lowercase) → energised.
    pub outlets: BTreeMap<u8, bool>,
    /// Feedback digit → outlet letter it reports on.
    pub feedback_map: BTreeMap<u8, u8>,
    pub temperature: String,
    pub refuel_pressed: bool,
    /// The board stops answering anything.
    pub silent: bool,
    pub opens: u32,
    pub power_cycles: u32,
    pub written: Vec<u8>,
}

#[derive(Clone)]
pub struct MockBoard(pub Rc<RefCell<BoardState>>);

#[allow(dead_code)]
impl MockBoard {
    /// Board wired like the default three-heater layout.
    pub fn new(temperature: f32) -> Self {
        let node = DeviceNode {
            path: "/dev/ttyUSB0".into(),
            enumerated: SystemTime::UNIX_EPOCH + Duration::from_secs(100),
        };
        Self(Rc::new(RefCell::new(BoardState {
            nodes: vec![node],
            outlets: BTreeMap::new(),
            feedback_map: [(b'1', b'a'), (b'2', b'b'), (b'3', b'c')].into_iter().collect(),
            temperature: format!("{temperature:.1}"),
            refuel_pressed: false,
            silent: false,
            opens: 0,
            power_cycles: 0,
            written: Vec::new(),
        })))
    }

    pub fn outlet_on(&self, letter: char) -> bool {
        let b = self.0.borrow();
        b.outlets.get(&(letter as u8)).copied().unwrap_or(false)
    }

    pub fn unplug(&self) {
        let mut b = self.0.borrow_mut();
        b.nodes.clear();
        b.silent = true;
    }

    fn answer(&self, byte: u8) -> Option<String> {
        let mut b = self.0.borrow_mut();
        b.written.push(byte);
        if b.silent {
            return None;
        }
        let reply = match byte {
            b'H' => "H".to_owned(),
            b'F' => b.temperature.clone(),
            b'R' => {
                if std::mem::take(&mut b.refuel_pressed) {
                    "R".to_owned()
                } else {
                    "0".to_owned()
                }
            }
            b'a'..=b'z' => {
                b.outlets.insert(byte, false);
                char::from(byte).to_string()
            }
            b'A'..=b'Z' => {
                b.outlets.insert(byte.to_ascii_lowercase(), true);
                char::from(byte).to_string()
            }
            b'0'..=b'9' => {
                let on = b
                    .feedback_map
                    .get(&byte)
                    .and_then(|letter| b.outlets.get(letter))
                    .copied()
                    .unwrap_or(false);
                if on { "0" } else { "1" }.to_owned()
            }
            _ => "?".to_owned(),
        };
        Some(reply)
    }
}

pub struct BoardLink {
    board: MockBoard,
    pending: Option<String>,
}

impl SerialLink for BoardLink {
    fn drain(&mut self) -> Result<(), LinkError> {
        self.pending = None;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        for &byte in bytes {
            self.pending = self.board.answer(byte);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, LinkError> {
        Ok(self.pending.take().unwrap_or_default())
    }
}

impl LinkBackend for MockBoard {
    type Link = BoardLink;

    fn discover(&mut self, _prefix: &str) -> Vec<DeviceNode> {
        self.0.borrow().nodes.clone()
    }

    fn open(&mut self, _path: &str, _baud: u32, _timeout: Duration) -> Result<BoardLink, LinkError> {
        self.0.borrow_mut().opens += 1;
        Ok(BoardLink {
            board: self.clone(),
            pending: None,
        })
    }

    fn power_cycle(&mut self, _command: &[String]) -> Result<(), LinkError> {
        self.0.borrow_mut().power_cycles += 1;
        Ok(())
    }
}
