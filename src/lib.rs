//! heatctl library.
//!
//! Exposes the controller core and its adapters for integration testing.
//! Hardware-facing adapters sit behind the `serial` and `influx` features;
//! everything else runs on the host against mocks.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod monitor;
pub mod scheduler;
pub mod sensors;
pub mod state;
pub mod telemetry;
