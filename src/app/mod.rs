//! Application core — the control loop and the ports it talks through.
//!
//! All interaction with hardware, the metrics store and the persisted
//! document happens through **port traits** defined in [`ports`], keeping
//! this layer fully testable without real peripherals.

pub mod ports;
pub mod service;
