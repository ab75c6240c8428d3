//! Outbound collaborators: the metrics sink and the log sink.
//!
//! Both are reached through a [`NetContext`] created once at startup and
//! rebuilt in place by [`NetContext::reconnect`].

pub mod influx;
pub mod syslog;

use futures::future::BoxFuture;

use crate::config::{InfluxConfig, SyslogConfig};
use crate::error::Result;

pub use influx::{InfluxSink, format_point};
pub use syslog::SyslogSink;

/// Receives batches of line-protocol points.
pub trait MetricsSink: Send + Sync {
    /// Posts one batch. Only a confirmed write is `Ok`.
    fn post<'a>(&'a self, batch: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Rebuilds any connection state.
    fn reconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Receives operator log messages. Delivery is best effort.
pub trait LogSink: Send + Sync {
    /// Sends one message, ignoring failures.
    fn send(&self, message: &str);

    /// Rebuilds any connection state.
    fn reconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Network handles shared by the update manager and the poll loop.
pub struct NetContext {
    metrics: Box<dyn MetricsSink>,
    log: Option<Box<dyn LogSink>>,
}

impl NetContext {
    /// Wraps existing sinks.
    pub fn new(metrics: impl MetricsSink + 'static, log: Option<Box<dyn LogSink>>) -> Self {
        Self {
            metrics: Box::new(metrics),
            log,
        }
    }

    /// Builds the Influx sink and, if configured, the UDP log sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the log host
    /// cannot be resolved.
    pub async fn connect(influx: &InfluxConfig, syslog: Option<&SyslogConfig>) -> Result<Self> {
        let metrics = InfluxSink::new(influx)?;
        let log: Option<Box<dyn LogSink>> = match syslog {
            Some(cfg) => Some(Box::new(SyslogSink::bind(&cfg.host, cfg.port).await?)),
            None => None,
        };
        Ok(Self::new(metrics, log))
    }

    /// Logs a message locally and sends it to the log sink.
    pub fn log(&self, message: &str) {
        tracing::info!("{}", message);
        if let Some(log) = &self.log {
            log.send(message);
        }
    }

    /// Posts a metrics batch.
    ///
    /// # Errors
    ///
    /// Returns whatever the metrics sink reports.
    pub async fn post(&self, batch: &str) -> Result<()> {
        self.metrics.post(batch).await
    }

    /// Recreates the network handles after a transport failure.
    pub async fn reconnect(&mut self) {
        tracing::info!("reconnecting network sinks");
        if let Err(e) = self.metrics.reconnect().await {
            tracing::warn!("metrics sink reconnect failed: {}", e);
        }
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.reconnect().await {
                tracing::warn!("log sink reconnect failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for NetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetContext")
            .field("log", &self.log.is_some())
            .finish_non_exhaustive()
    }
}
