//! Unified error types for the heater controller.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! control loop's error handling uniform.  All variants are `Copy` so they
//! can be passed through the scheduler and monitor without allocation.
//!
//! Only [`LinkError::NoDevice`] is fatal: it means there is no outlet board
//! left to talk to, and the top-level loop alone decides what to do about it.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The device link could not be recovered.
    Link(LinkError),
    /// A single outlet command or query failed.
    Driver(DriverError),
    /// The temperature probe returned nothing usable.
    Sensor(SensorError),
    /// The persisted document could not be loaded, validated or written.
    Config(ConfigError),
    /// The metrics store rejected or never received a batch.
    Sink(SinkError),
}

impl Error {
    /// True when nothing is left to retry against (host-level recovery).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Link(e) => e.is_fatal(),
            Self::Driver(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Driver(e) => write!(f, "driver: {e}"),
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Sink(e) => write!(f, "metrics: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No candidate device node exists at all.
    NoDevice,
    /// The node could not be opened at the configured baud rate.
    OpenFailed,
    /// The probe byte was never echoed back.
    HandshakeFailed,
    /// The device-level power cycle command failed.
    PowerCycleFailed,
    /// Read or write on an open link failed.
    Io,
}

impl LinkError {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::NoDevice)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no serial device detected"),
            Self::OpenFailed => write!(f, "failed to open serial device"),
            Self::HandshakeFailed => write!(f, "handshake not echoed"),
            Self::PowerCycleFailed => write!(f, "device power cycle failed"),
            Self::Io => write!(f, "serial I/O error"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Driver errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// No response after every retry; link recovery has already been run.
    NoResponse,
    /// The board answered with something other than the expected echo.
    Rejected,
    /// Unit name is not wired to this driver.
    UnknownUnit,
    /// A GPIO pin write or read failed.
    Pin,
    /// Recovery of the shared link failed.
    Link(LinkError),
}

impl DriverError {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Link(e) if e.is_fatal())
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "device not responding"),
            Self::Rejected => write!(f, "unexpected response"),
            Self::UnknownUnit => write!(f, "unit not wired to driver"),
            Self::Pin => write!(f, "GPIO access failed"),
            Self::Link(e) => write!(f, "{e}"),
        }
    }
}

impl From<LinkError> for DriverError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Link(link) => Self::Link(link),
            other => Self::Driver(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The probe did not answer in time.
    Timeout,
    /// The probe answered with something that is not a temperature.
    Invalid,
    /// The link carrying the probe query is gone.
    Link(LinkError),
}

impl SensorError {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Link(e) if e.is_fatal())
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "probe timeout"),
            Self::Invalid => write!(f, "probe returned invalid data"),
            Self::Link(e) => write!(f, "probe link: {e}"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        match e {
            SensorError::Link(link) => Self::Link(link),
            other => Self::Sensor(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors from [`ConfigPort`](crate::app::ports::ConfigPort) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No document found in storage (first boot).
    NotFound,
    /// Stored document failed deserialization.
    Corrupted,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Unit name is not present in the document.
    UnknownUnit,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::UnknownUnit => write!(f, "unknown unit"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Metrics sink errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The store could not be reached.
    Unreachable,
    /// The store answered with a non-success status.
    Rejected(u16),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "metrics store unreachable"),
            Self::Rejected(status) => write!(f, "metrics store rejected batch (HTTP {status})"),
        }
    }
}

impl From<SinkError> for Error {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Controller-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
