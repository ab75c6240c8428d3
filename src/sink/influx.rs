//! InfluxDB v2 line-protocol sink.

use std::fmt::Write as _;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::config::InfluxConfig;
use crate::error::{Error, Result};
use crate::sink::MetricsSink;
use crate::types::TelemetrySample;

/// Measurement name of every point.
pub const MEASUREMENT: &str = "battery_data";

/// Formats one line-protocol point for channel `name`, newline terminated.
#[must_use]
pub fn format_point(name: &str, sample: &TelemetrySample) -> String {
    let mut line = String::with_capacity(160);
    let _ = write!(
        line,
        "{MEASUREMENT},unit={name} soc={}i,cycles={}i,volts={:.3},amps={:.3},power={:.3},high={:.3},low={:.3},discharge={}i",
        sample.soc,
        sample.cycles,
        sample.voltage,
        sample.current,
        sample.power(),
        sample.cell_high,
        sample.cell_low,
        u8::from(sample.discharge_enabled()),
    );
    line.push('\n');
    line
}

/// Posts line-protocol batches to `/api/v2/write`.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
}

impl InfluxSink {
    /// Creates a sink for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            write_url: format!(
                "{}/api/v2/write?org={}&bucket={}",
                config.url.trim_end_matches('/'),
                config.org,
                config.bucket
            ),
            token: config.token.clone(),
        })
    }

    /// Full write URL including org and bucket.
    #[must_use]
    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    async fn write(&self, batch: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.write_url)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(ACCEPT, "application/json")
            .body(batch.to_owned())
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(Error::Post {
                status: status.as_u16(),
            }),
        }
    }
}

impl MetricsSink for InfluxSink {
    fn post<'a>(&'a self, batch: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write(batch))
    }

    fn reconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.client = reqwest::Client::builder().build()?;
            Ok(())
        })
    }
}
