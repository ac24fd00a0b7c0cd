//! Outlet board over a shared byte link.
//!
//! The board speaks single-character commands and answers each with one
//! line:
//!
//! | Command            | Byte              | Good answer        |
//! |--------------------|-------------------|--------------------|
//! | outlet on / off    | `A`..`Z` / `a`..`z` | the same byte    |
//! | feedback query     | `0`..`9`          | `0` = active       |
//! | temperature        | `F`               | decimal °F         |
//! | refuel signal      | `R`               | `R` = pressed      |
//! | handshake          | `H`               | `H`                |
//!
//! ## Recovery ladder
//!
//! ```text
//!  send ×attempts ──▶ reopen newest node + handshake ──▶ power cycle,
//!  (drain first)      (probe ×5, 1 s backoff)            settle, reopen
//!                                                              │
//!            no device node at all ──▶ LinkError::NoDevice ◀───┘
//!                                      (fatal, host restart)
//! ```
//!
//! Everything is synchronous: a recovery blocks the caller until the link
//! is usable or the ladder is exhausted.  Only one exchange is ever in
//! flight.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use log::{debug, error, info, warn};

use crate::app::ports::{Clock, Feedback, OutletDriver};
use crate::config::{HeaterConfig, LinkConfig};
use crate::error::{DriverError, LinkError, SensorError};

const HANDSHAKE: u8 = b'H';
const TEMPERATURE: u8 = b'F';
const REFUEL: u8 = b'R';
const FEEDBACK_ACTIVE: &str = "0";

// ───────────────────────────────────────────────────────────────
// Link abstraction
// ───────────────────────────────────────────────────────────────

/// An open byte link to the board.
pub trait SerialLink {
    /// Discard anything left over from earlier exchanges.
    fn drain(&mut self) -> Result<(), LinkError>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// One response line, or an empty string when the read timed out.
    fn read_line(&mut self) -> Result<String, LinkError>;
}

/// A candidate device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    pub path: String,
    /// When the node appeared (re-enumeration after a reset makes a new one).
    pub enumerated: SystemTime,
}

/// Discovers, opens and power-cycles links.
pub trait LinkBackend {
    type Link: SerialLink;

    fn discover(&mut self, prefix: &str) -> Vec<DeviceNode>;

    fn open(&mut self, path: &str, baud: u32, timeout: Duration) -> Result<Self::Link, LinkError>;

    /// Device-level reset (e.g. USB bus reset).
    fn power_cycle(&mut self, command: &[String]) -> Result<(), LinkError>;
}

/// Most recently enumerated node; path order breaks ties.
pub fn newest_node(nodes: &[DeviceNode]) -> Option<&DeviceNode> {
    nodes
        .iter()
        .max_by(|a, b| a.enumerated.cmp(&b.enumerated).then_with(|| a.path.cmp(&b.path)))
}

// ───────────────────────────────────────────────────────────────
// Response decoding
// ───────────────────────────────────────────────────────────────

/// The board acknowledges by echoing the command byte.
pub fn decode_echo(command: u8, response: &str) -> bool {
    response.as_bytes() == [command]
}

pub fn decode_feedback(response: &str) -> Feedback {
    if response == FEEDBACK_ACTIVE {
        Feedback::Active
    } else {
        Feedback::Inactive
    }
}

pub fn decode_temperature(response: &str) -> Result<f32, SensorError> {
    match response.trim().parse::<f32>() {
        Ok(t) if t.is_finite() => Ok(t),
        _ => Err(SensorError::Invalid),
    }
}

// ───────────────────────────────────────────────────────────────
// Protocol driver
// ───────────────────────────────────────────────────────────────

/// Command bytes for one unit.
#[derive(Debug, Clone, Copy)]
struct Wiring {
    outlet: u8,
    feedback: u8,
}

impl Wiring {
    fn from_config(config: &HeaterConfig) -> Option<Self> {
        Some(Self {
            outlet: u8::try_from(config.outlet).ok()?,
            feedback: u8::try_from(config.feedback).ok()?,
        })
    }
}

pub struct DeviceProtocol<B: LinkBackend, C: Clock> {
    backend: B,
    clock: C,
    config: LinkConfig,
    link: Option<B::Link>,
    device: Option<String>,
    wiring: BTreeMap<String, Wiring>,
    recoveries: u32,
}

impl<B: LinkBackend, C: Clock> DeviceProtocol<B, C> {
    /// Open the newest device node and handshake.
    ///
    /// A failed handshake is logged and tolerated (the board may still
    /// answer commands); a missing device node is not.
    pub fn connect(
        backend: B,
        clock: C,
        config: &LinkConfig,
        heaters: &BTreeMap<String, HeaterConfig>,
    ) -> Result<Self, LinkError> {
        let mut wiring = BTreeMap::new();
        for (name, heater) in heaters {
            match Wiring::from_config(heater) {
                Some(w) => {
                    wiring.insert(name.clone(), w);
                }
                None => warn!("Link: {} has non-ASCII command codes, not wired", name),
            }
        }

        let mut proto = Self {
            backend,
            clock,
            config: config.clone(),
            link: None,
            device: None,
            wiring,
            recoveries: 0,
        };
        match proto.reopen() {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!("Link: {} on startup, continuing", e),
        }
        Ok(proto)
    }

    /// Path of the node currently in use.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Recovery ladders run since startup.
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ── Exchange ──────────────────────────────────────────────

    /// Send one command and return the trimmed answer.
    ///
    /// After `attempts` unanswered sends the recovery ladder runs once and
    /// the exchange reports [`DriverError::NoResponse`].  A closed link runs
    /// the ladder before sending instead, never twice per command.
    fn exchange(&mut self, command: u8) -> Result<String, DriverError> {
        let mut recovered = false;
        if self.link.is_none() {
            warn!("Link: closed, recovering before '{}'", char::from(command));
            recovered = true;
            match self.recover() {
                Ok(()) => {}
                Err(e) if e.is_fatal() || self.link.is_none() => return Err(e.into()),
                Err(e) => error!("Link: recovery failed: {}", e),
            }
        }

        match self.try_send(command) {
            Ok(Some(response)) => return Ok(response),
            Ok(None) => error!("Serial not responding to '{}'", char::from(command)),
            Err(e) => error!("Serial exception on '{}': {}", char::from(command), e),
        }
        if recovered {
            return Err(DriverError::NoResponse);
        }

        match self.recover() {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => error!("Link: recovery failed: {}", e),
        }
        Err(DriverError::NoResponse)
    }

    fn try_send(&mut self, command: u8) -> Result<Option<String>, LinkError> {
        let Some(link) = self.link.as_mut() else {
            return Err(LinkError::OpenFailed);
        };
        link.drain()?;
        for attempt in 1..=self.config.attempts {
            link.write(&[command])?;
            let response = link.read_line()?;
            let response = response.trim();
            if !response.is_empty() {
                return Ok(Some(response.to_owned()));
            }
            debug!("Serial: '{}' attempt {} timed out", char::from(command), attempt);
        }
        Ok(None)
    }

    // ── Recovery ──────────────────────────────────────────────

    /// Soft reopen first; power cycle and reopen if that does not clear it.
    ///
    /// A node missing on the soft reopen is not fatal yet: the bus reset may
    /// bring it back.  Only the reopen after the power cycle reports
    /// [`LinkError::NoDevice`].
    fn recover(&mut self) -> Result<(), LinkError> {
        self.recoveries += 1;
        warn!("Link: recovery #{}", self.recoveries);

        match self.reopen() {
            Ok(()) => {
                info!("Link: recovered by reopen");
                return Ok(());
            }
            Err(e) => warn!("Link: reopen did not clear the fault: {}", e),
        }

        self.link = None;
        if let Err(e) = self.backend.power_cycle(&self.config.power_cycle_command) {
            error!("Link: power cycle failed: {}", e);
        }
        self.clock
            .sleep(Duration::from_millis(u64::from(self.config.power_cycle_settle_ms)));
        self.reopen()?;
        info!("Link: recovered after power cycle");
        Ok(())
    }

    /// Close, rediscover, open and handshake.
    fn reopen(&mut self) -> Result<(), LinkError> {
        self.link = None;
        let nodes = self.backend.discover(&self.config.device_prefix);
        let Some(node) = newest_node(&nodes) else {
            error!("No serial devices detected under {}", self.config.device_prefix);
            return Err(LinkError::NoDevice);
        };
        let path = node.path.clone();

        let timeout = Duration::from_millis(u64::from(self.config.timeout_ms));
        let link = self.backend.open(&path, self.config.baud, timeout)?;
        info!("Link: opened {} at {} baud", path, self.config.baud);
        self.link = Some(link);
        self.device = Some(path);
        self.handshake()
    }

    fn handshake(&mut self) -> Result<(), LinkError> {
        let Some(link) = self.link.as_mut() else {
            return Err(LinkError::OpenFailed);
        };
        let backoff = Duration::from_millis(u64::from(self.config.handshake_backoff_ms));
        for attempt in 1..=self.config.handshake_attempts {
            let echoed = link
                .write(&[HANDSHAKE])
                .and_then(|()| link.read_line())
                .is_ok_and(|r| decode_echo(HANDSHAKE, r.trim()));
            if echoed {
                debug!("Link: handshake ok after {} attempt(s)", attempt);
                return Ok(());
            }
            self.clock.sleep(backoff);
        }
        error!("Link: handshake failed after {} attempts", self.config.handshake_attempts);
        Err(LinkError::HandshakeFailed)
    }

    fn wiring(&self, unit: &str) -> Result<Wiring, DriverError> {
        self.wiring.get(unit).copied().ok_or(DriverError::UnknownUnit)
    }
}

impl<B: LinkBackend, C: Clock> OutletDriver for DeviceProtocol<B, C> {
    fn set_output(&mut self, unit: &str, on: bool) -> Result<(), DriverError> {
        let outlet = self.wiring(unit)?.outlet;
        let code = if on {
            outlet.to_ascii_uppercase()
        } else {
            outlet.to_ascii_lowercase()
        };
        let response = self.exchange(code)?;
        if decode_echo(code, &response) {
            Ok(())
        } else {
            warn!("{}: outlet '{}' answered {:?}", unit, char::from(code), response);
            Err(DriverError::Rejected)
        }
    }

    fn read_feedback(&mut self, unit: &str) -> Result<Feedback, DriverError> {
        let code = self.wiring(unit)?.feedback;
        match self.exchange(code) {
            Ok(response) => Ok(decode_feedback(&response)),
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(Feedback::Unknown),
        }
    }

    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        match self.exchange(TEMPERATURE) {
            Ok(response) => decode_temperature(&response),
            Err(DriverError::Link(e)) if e.is_fatal() => {
                error!("Temperature query lost the link: {}", e);
                Err(SensorError::Link(e))
            }
            Err(e) => {
                debug!("Temperature query failed: {}", e);
                Err(SensorError::Timeout)
            }
        }
    }

    fn refuel_signal(&mut self) -> Result<bool, DriverError> {
        let response = self.exchange(REFUEL)?;
        Ok(decode_echo(REFUEL, &response))
    }

    fn recover_link(&mut self) -> Result<(), LinkError> {
        self.recover()
    }
}
