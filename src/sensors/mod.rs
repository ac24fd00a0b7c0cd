//! Sensor subsystem.
//!
//! The temperature probe itself sits behind the outlet driver (it shares
//! the board link); this module adds the read policy on top.

pub mod temperature;

pub use temperature::{ReadingSource, TemperatureReader, TemperatureReading};
