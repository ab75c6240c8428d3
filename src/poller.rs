//! The acquisition loop.
//!
//! Each cycle drains every channel once, decodes whatever frames completed,
//! and hands the results to the sinks. Metrics are rate limited to one point
//! per channel per wall-clock minute.

use std::time::Duration;

use chrono::Timelike;

use crate::channel::ChannelBank;
use crate::error::Error;
use crate::protocol::parse_telemetry;
use crate::run::RunSwitch;
use crate::sink::{NetContext, format_point};

/// Source of the current wall-clock minute.
pub trait Clock: Send + Sync {
    /// Minute of the hour, 0..=59.
    fn minute(&self) -> u32;
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn minute(&self) -> u32 {
        chrono::Local::now().minute()
    }
}

/// What one poll cycle produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollCycle {
    /// `(<name>) ` for every channel that produced a frame.
    pub log_line: String,
    /// `(<name>) Bad CRC: <hex>` for every frame that failed validation.
    pub rejected: Vec<String>,
    /// Line-protocol points due this cycle.
    pub batch: String,
    /// Frames decoded this cycle.
    pub frames: usize,
}

/// Drains channels and forwards the results.
pub struct Poller<C = SystemClock> {
    channels: ChannelBank,
    net: NetContext,
    clock: C,
    last_minute: Vec<Option<u32>>,
    idle: Duration,
}

impl Poller<SystemClock> {
    /// Creates a poller on the local wall clock.
    #[must_use]
    pub fn new(channels: ChannelBank, net: NetContext) -> Self {
        Self::with_clock(channels, net, SystemClock)
    }
}

impl<C: Clock> Poller<C> {
    /// Creates a poller with a custom clock.
    pub fn with_clock(channels: ChannelBank, net: NetContext, clock: C) -> Self {
        let last_minute = vec![None; channels.len()];
        Self {
            channels,
            net,
            clock,
            last_minute,
            idle: Duration::from_millis(20),
        }
    }

    /// Sets the pause between cycles.
    #[must_use]
    pub const fn idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Network handles.
    #[must_use]
    pub const fn net(&self) -> &NetContext {
        &self.net
    }

    /// Drains every channel once, in order.
    pub async fn poll_once(&mut self) -> PollCycle {
        let mut cycle = PollCycle::default();

        for (index, handle) in self.channels.iter().enumerate() {
            let mut channel = handle.lock().await;
            let frame = match channel.drain() {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(rejected) => {
                    cycle
                        .rejected
                        .push(format!("({}) {}", channel.name(), rejected));
                    continue;
                }
            };

            let sample = parse_telemetry(&frame);
            cycle.frames += 1;
            cycle.log_line.push('(');
            cycle.log_line.push_str(channel.name());
            cycle.log_line.push_str(") ");

            tracing::debug!(
                channel = channel.name(),
                soc = sample.soc,
                volts = sample.voltage,
                amps = sample.current,
                charger = %sample.charger,
                stats = ?channel.stats(),
                "telemetry"
            );

            let minute = self.clock.minute();
            if self.last_minute[index] != Some(minute) {
                cycle.batch.push_str(&format_point(channel.name(), &sample));
                self.last_minute[index] = Some(minute);
            }
        }

        cycle
    }

    /// Sends a cycle's log line and metrics. Failures are logged and absorbed.
    pub async fn forward(&mut self, cycle: &PollCycle) {
        for line in &cycle.rejected {
            self.net.log(line);
        }
        if !cycle.log_line.is_empty() {
            self.net.log(&cycle.log_line);
        }
        if cycle.batch.is_empty() {
            return;
        }

        match self.net.post(&cycle.batch).await {
            Ok(()) => self.net.log("Posting data Success"),
            Err(Error::Post { status }) => {
                self.net.log(&format!("Response code was: {status}"));
                self.net.log("Posting data failed");
            }
            Err(e) => {
                tracing::warn!("metrics post failed: {}", e);
                self.net.log("Posting data Failed via exception");
                self.net.reconnect().await;
            }
        }
    }

    /// Polls until the run switch is released. Returns the number of cycles.
    pub async fn run(mut self, run: RunSwitch) -> u64 {
        tracing::info!("poll loop started with {} channels", self.channels.len());
        let mut cycles = 0u64;
        while run.is_enabled() {
            let cycle = self.poll_once().await;
            self.forward(&cycle).await;
            cycles += 1;
            tokio::time::sleep(self.idle).await;
        }
        tracing::info!("poll loop stopped after {} cycles", cycles);
        cycles
    }
}
