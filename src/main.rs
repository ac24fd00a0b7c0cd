//! heatctl — Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SerialBackend     InfluxSink       JsonFileStore  SystemClock │
//! │  (LinkBackend)     (MetricsSink)    (ConfigPort)   (Clock)     │
//! │                    InfluxHistory                               │
//! │                    (HistoryPort)                               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              ControlLoop (pure logic)                  │    │
//! │  │  Scheduler · Monitor · Heaters · Telemetry             │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The document path comes from the first argument, then `HEATCTL_CONFIG`,
//! then [`DEFAULT_CONFIG_PATH`].  A fatal error (the outlet board is gone)
//! ends the loop; `main` logs it and runs `host_restart_command`.

#![deny(unused_must_use)]

use std::env;
use std::process::Command;

use anyhow::{Context, Result};
use log::{error, info, warn};

use heatctl::adapters::log_sink::LogMetricsSink;
use heatctl::adapters::state_file::JsonFileStore;
use heatctl::app::ports::{HistoryPort, MetricsSink, NoHistory};
use heatctl::config::SystemConfig;
use heatctl::state::StateStore;

const DEFAULT_CONFIG_PATH: &str = "/var/lib/heatctl/config.json";

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("heatctl v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Persisted document ─────────────────────────────────
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("HEATCTL_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let store = StateStore::open(JsonFileStore::new(&path))
        .with_context(|| format!("Failed to load configuration from {}", path))?;
    if let Err(e) = store.save() {
        warn!("Configuration not written to {}: {}", path, e);
    }
    let config = store.config().clone();
    info!(
        "{} heaters configured at {}/{}",
        config.heaters.len(),
        config.site.location,
        config.site.controller
    );

    // ── 3. Metrics store ──────────────────────────────────────
    let (sink, mut history) = metrics(&config)?;

    // ── 4. Outlet board + control loop ────────────────────────
    run(store, sink, history.as_mut(), &config)
}

#[cfg(feature = "influx")]
fn metrics(config: &SystemConfig) -> Result<(Box<dyn MetricsSink>, Box<dyn HistoryPort>)> {
    use heatctl::adapters::influx::InfluxClient;

    match &config.telemetry.influx {
        Some(influx) => {
            let client = InfluxClient::new(influx, &config.site)?;
            info!("Telemetry: InfluxDB at {} (db {})", influx.url, influx.database);
            Ok((Box::new(client.sink()), Box::new(client.history())))
        }
        None => {
            info!("Telemetry: no metrics store configured, logging only");
            Ok((Box::new(LogMetricsSink::new()), Box::new(NoHistory)))
        }
    }
}

#[cfg(not(feature = "influx"))]
fn metrics(config: &SystemConfig) -> Result<(Box<dyn MetricsSink>, Box<dyn HistoryPort>)> {
    if config.telemetry.influx.is_some() {
        warn!("Telemetry: InfluxDB configured but support not compiled in, logging only");
    }
    Ok((Box::new(LogMetricsSink::new()), Box::new(NoHistory)))
}

#[cfg(feature = "serial")]
fn run(
    store: StateStore<JsonFileStore>,
    sink: Box<dyn MetricsSink>,
    history: &mut dyn HistoryPort,
    config: &SystemConfig,
) -> Result<()> {
    use heatctl::adapters::serial::SerialBackend;
    use heatctl::adapters::time::SystemClock;
    use heatctl::app::service::ControlLoop;
    use heatctl::drivers::link::DeviceProtocol;
    use heatctl::error::Error;

    let clock = SystemClock::new();
    let mut driver =
        match DeviceProtocol::connect(SerialBackend::new(), &clock, &config.link, &config.heaters) {
            Ok(d) => d,
            Err(e) => {
                error!("Outlet board unavailable: {}", e);
                request_host_restart(&config.host_restart_command);
                return Err(Error::from(e).into());
            }
        };
    info!("Outlet board on {}", driver.device().unwrap_or("(not connected)"));

    let mut control = ControlLoop::new(store, sink, &clock);
    let Err(e) = control.run(&mut driver, history, &clock);

    error!("Control loop stopped: {}", e);
    if e.is_fatal() {
        request_host_restart(&config.host_restart_command);
    }
    Err(e.into())
}

#[cfg(not(feature = "serial"))]
fn run(
    _store: StateStore<JsonFileStore>,
    _sink: Box<dyn MetricsSink>,
    _history: &mut dyn HistoryPort,
    _config: &SystemConfig,
) -> Result<()> {
    anyhow::bail!("built without the `serial` feature: no outlet driver available")
}

/// Last-resort recovery: hand the problem to the host.
#[cfg_attr(not(feature = "serial"), allow(dead_code))]
fn request_host_restart(command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        error!("No host restart command configured");
        return;
    };
    error!("Requesting host restart: {}", command.join(" "));
    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => info!("Host restart requested"),
        Ok(status) => error!("Host restart command exited with {}", status),
        Err(e) => error!("Host restart command could not run: {}", e),
    }
}
