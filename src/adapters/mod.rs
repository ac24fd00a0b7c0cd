//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements            | Connects to                   |
//! |--------------|-----------------------|-------------------------------|
//! | `influx`     | MetricsSink           | InfluxDB `/write`             |
//! |              | HistoryPort           | InfluxDB `/query`             |
//! | `log_sink`   | MetricsSink           | Log output                    |
//! | `serial`     | LinkBackend           | USB serial outlet board       |
//! | `state_file` | ConfigPort            | JSON document / in-memory     |
//! | `time`       | Clock                 | System clock / simulation     |

#[cfg(feature = "influx")]
pub mod influx;
pub mod log_sink;
#[cfg(feature = "serial")]
pub mod serial;
pub mod state_file;
pub mod time;
