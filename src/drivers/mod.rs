//! Heating units and the outlet drivers that switch them.

pub mod gpio;
pub mod heater;
pub mod link;
