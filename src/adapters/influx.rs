//! InfluxDB adapter (1.x HTTP API).
//!
//! [`InfluxSink`] implements [`MetricsSink`] by POSTing line protocol to
//! `/write`; [`InfluxHistory`] implements [`HistoryPort`] with an InfluxQL
//! query against `/query`.  Both share one blocking HTTP client.
//!
//! Every point is tagged with the site `location` and `controller` plus
//! the unit name as `outlet`, and carries its value in the `value` field
//! at second precision.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;

use crate::app::ports::{HistoryPort, MetricsSink};
use crate::config::{InfluxConfig, SiteConfig};
use crate::error::SinkError;
use crate::telemetry::TelemetryPoint;

#[derive(Clone)]
pub struct InfluxClient {
    http: Client,
    config: InfluxConfig,
    site: SiteConfig,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig, site: &SiteConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(u64::from(config.timeout_secs)))
            .build()
            .context("Failed to create InfluxDB HTTP client")?;
        Ok(Self {
            http,
            config: config.clone(),
            site: site.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => req.basic_auth(user, self.config.password.as_ref()),
            None => req,
        }
    }

    pub fn sink(&self) -> InfluxSink {
        InfluxSink {
            client: self.clone(),
        }
    }

    pub fn history(&self) -> InfluxHistory {
        InfluxHistory {
            client: self.clone(),
        }
    }
}

// ── Write path ────────────────────────────────────────────────

pub struct InfluxSink {
    client: InfluxClient,
}

impl MetricsSink for InfluxSink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        let c = &self.client;
        let body = points
            .iter()
            .map(|p| line_protocol(p, &c.site))
            .collect::<Vec<_>>()
            .join("\n");

        let req = c
            .http
            .post(c.endpoint("write"))
            .query(&[("db", c.config.database.as_str()), ("precision", "s")])
            .body(body);
        let resp = c.authed(req).send().map_err(|e| {
            warn!("InfluxDB write failed: {}", e);
            SinkError::Unreachable
        })?;

        let status = resp.status();
        if status.is_success() {
            debug!("InfluxDB accepted {} points", points.len());
            Ok(())
        } else {
            Err(SinkError::Rejected(status.as_u16()))
        }
    }
}

/// One point as an InfluxDB line.
pub fn line_protocol(point: &TelemetryPoint, site: &SiteConfig) -> String {
    format!(
        "{},location={},controller={},outlet={} value={} {}",
        escape(point.measurement),
        escape(&site.location),
        escape(&site.controller),
        escape(&point.unit),
        point.value,
        point.timestamp.timestamp()
    )
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ── Read path ─────────────────────────────────────────────────

pub struct InfluxHistory {
    client: InfluxClient,
}

impl HistoryPort for InfluxHistory {
    fn latest_value(&mut self, measurement: &str, location: &str, window: Duration) -> Option<f64> {
        let c = &self.client;
        let q = format!(
            "SELECT \"value\" FROM \"{}\" WHERE (\"location\" = '{}') AND time >= now() - {}s ORDER BY time DESC LIMIT 1",
            measurement.replace('"', ""),
            location.replace('\'', ""),
            window.as_secs()
        );
        let req = c
            .http
            .get(c.endpoint("query"))
            .query(&[("db", c.config.database.as_str()), ("q", q.as_str())]);

        let body: Value = match c.authed(req).send().and_then(|r| r.error_for_status()) {
            Ok(resp) => match resp.json() {
                Ok(v) => v,
                Err(e) => {
                    warn!("InfluxDB query returned bad JSON: {}", e);
                    return None;
                }
            },
            Err(e) => {
                warn!("InfluxDB query failed: {}", e);
                return None;
            }
        };
        parse_latest(&body)
    }
}

/// First value of the first series, as returned by `/query`.
pub fn parse_latest(body: &Value) -> Option<f64> {
    body.get("results")?
        .get(0)?
        .get("series")?
        .get(0)?
        .get("values")?
        .get(0)?
        .get(1)?
        .as_f64()
}
