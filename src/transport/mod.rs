//! Transport layer for pack communication.
//!
//! Two seams live here:
//! - [`Transport`] writes to the shared pack bus (used for the keep-alive).
//! - [`ByteSource`] hands received bytes to a channel without blocking.
//!
//! Implementations: the shared serial peripheral ([`serial`]) and the
//! per-pin bit-level decoder ([`decoder`]).

pub mod decoder;
pub mod serial;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Result;

/// Trait for bus writer implementations.
pub trait Transport: Send + Sync {
    /// Connects to the bus.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Disconnects from the bus.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes raw bytes onto the bus.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

/// How a channel receives its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Shared hardware serial peripheral, one byte at a time.
    Peripheral,
    /// Independent bit-level decoder on a single pin.
    BitDecoder,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peripheral => f.write_str("serial"),
            Self::BitDecoder => f.write_str("decoder"),
        }
    }
}

/// A non-blocking supply of received bytes.
pub trait ByteSource: Send {
    /// Returns the next received byte, or `None` if nothing is pending.
    fn try_read(&mut self) -> Option<u8>;

    /// Drops everything pending and returns how many units were dropped.
    fn discard(&mut self) -> usize;

    /// Restarts the receiver. Sources without receiver state ignore this.
    fn restart(&mut self) {}

    /// Which kind of source this is.
    fn kind(&self) -> SourceKind;
}

pub use decoder::{BitDecoder, DecoderFeed, DecoderSource};
pub use serial::{SerialSource, SerialTransport};
