//! # packwatch
//!
//! Telemetry acquisition agent for up to eight serial battery packs.
//!
//! Packs stream fixed 36-byte frames while they keep receiving a keep-alive
//! command. The agent validates each frame, decodes it, logs which packs
//! reported and posts one InfluxDB point per pack per minute.
//!
//! ## Features
//!
//! - Async/await based agent on Tokio
//! - Shared hardware UART plus software bit-level UART decoders
//! - Keep-alive broadcaster running beside the poll loop
//! - One-shot self-update with staged, verified, atomic replacement
//!
//! ## Quick Start
//!
//! ```no_run
//! use packwatch::{AgentConfig, Channel, ChannelBank, NetContext, Poller, RunSwitch, SerialSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), packwatch::Error> {
//!     let config = AgentConfig::default();
//!     let net = NetContext::connect(&config.influx, None).await?;
//!
//!     let (_bytes_tx, source) = SerialSource::channel(64);
//!     let bank = ChannelBank::new(vec![Channel::new("B01", source)]);
//!
//!     Poller::new(bank, net).run(RunSwitch::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Frames, checksum, telemetry decoding, keep-alive command
//! - [`types`] - Decoded telemetry records
//! - [`transport`] - Shared serial bus and bit-level decoder sources
//! - [`channel`] - Per-pack frame accumulation
//! - [`broadcaster`] - Periodic channel reset and keep-alive
//! - [`poller`] - The acquisition loop
//! - [`sink`] - Metrics and log sinks
//! - [`update`] - Self-update state machine
//! - [`config`] / [`run`] - Startup configuration and the run-enable input

pub mod broadcaster;
pub mod channel;
pub mod config;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod run;
pub mod sink;
pub mod transport;
pub mod types;
pub mod update;

// Re-exports for convenience
pub use broadcaster::Broadcaster;
pub use channel::{Channel, ChannelBank, ChannelStats, MAX_CHANNELS, Rejected};
pub use config::AgentConfig;
pub use error::{Error, FrameError, Result};
pub use poller::{Clock, PollCycle, Poller, SystemClock};
pub use protocol::{FRAME_LEN, Frame, checksum, keep_alive, parse_telemetry};
pub use run::RunSwitch;
pub use sink::{InfluxSink, LogSink, MetricsSink, NetContext, SyslogSink, format_point};
pub use transport::{
    BitDecoder, ByteSource, DecoderFeed, DecoderSource, SerialSource, SerialTransport, SourceKind,
    Transport, serial::list_ports,
};
pub use types::{ChargerState, StatusFlags, TelemetrySample, Temperatures};
pub use update::{
    ExitRestarter, HttpUpdateSource, Restarter, UpdateManager, UpdateOutcome, UpdateSource,
    UpdateState, VersionStore,
};
