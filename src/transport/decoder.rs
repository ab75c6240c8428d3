//! Bit-level UART decoder for packs wired to a plain input pin.
//!
//! The pin is sampled at eight times the baud rate. [`BitDecoder`] turns that
//! sample stream into received units the same way a programmable-I/O UART
//! receiver does:
//!
//! ```text
//! idle ─┐ start │ d0 │ d1 │ ... │ d7 │ stop ┌─ idle
//!       └───────┴────┴────┴─────┴────┘──────┘
//!         ^ detect  ^ sample at 1.5 bit times, then every 8 samples
//! ```
//!
//! Data bits are shifted right into a 32-bit register, so after eight bits the
//! received byte sits in the upper byte of the unit (`unit >> 24`). A low stop
//! bit counts as a break: nothing is pushed and the decoder waits for the line
//! to go high again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{ByteSource, SourceKind};

/// Pin samples per bit period.
pub const SAMPLES_PER_BIT: u8 = 8;

/// Samples skipped after the start edge before the first data sample.
const FIRST_SAMPLE_DELAY: u8 = SAMPLES_PER_BIT + SAMPLES_PER_BIT / 2 - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Data { wait: u8, bits: u8 },
    Stop { wait: u8 },
    Break,
}

/// Software UART receiver working on oversampled pin levels.
#[derive(Debug, Clone)]
pub struct BitDecoder {
    state: RxState,
    isr: u32,
    breaks: u64,
}

impl Default for BitDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BitDecoder {
    /// Creates a decoder waiting for a start bit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RxState::Idle,
            isr: 0,
            breaks: 0,
        }
    }

    /// Feeds one pin sample (`true` = high). Returns a unit when a byte with a
    /// valid stop bit completes.
    pub fn feed(&mut self, level: bool) -> Option<u32> {
        match self.state {
            RxState::Idle => {
                if !level {
                    self.state = RxState::Data {
                        wait: FIRST_SAMPLE_DELAY,
                        bits: 0,
                    };
                }
                None
            }
            RxState::Data { wait, bits } if wait > 0 => {
                self.state = RxState::Data {
                    wait: wait - 1,
                    bits,
                };
                None
            }
            RxState::Data { bits, .. } => {
                self.isr = (self.isr >> 1) | (u32::from(level) << 31);
                let bits = bits + 1;
                self.state = if bits == 8 {
                    RxState::Stop {
                        wait: SAMPLES_PER_BIT - 1,
                    }
                } else {
                    RxState::Data {
                        wait: SAMPLES_PER_BIT - 1,
                        bits,
                    }
                };
                None
            }
            RxState::Stop { wait } if wait > 0 => {
                self.state = RxState::Stop { wait: wait - 1 };
                None
            }
            RxState::Stop { .. } => {
                let unit = std::mem::take(&mut self.isr);
                if level {
                    self.state = RxState::Idle;
                    Some(unit)
                } else {
                    self.breaks += 1;
                    tracing::debug!("uart break detected");
                    self.state = RxState::Break;
                    None
                }
            }
            RxState::Break => {
                if level {
                    self.state = RxState::Idle;
                }
                None
            }
        }
    }

    /// Returns to the idle state and clears the shift register.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.isr = 0;
    }

    /// Number of framing errors or breaks seen.
    #[must_use]
    pub const fn breaks(&self) -> u64 {
        self.breaks
    }
}

/// Extracts the received byte from a decoder unit.
#[must_use]
pub const fn unit_byte(unit: u32) -> u8 {
    (unit >> 24) as u8
}

/// Byte source fed by a [`BitDecoder`] task.
#[derive(Debug)]
pub struct DecoderSource {
    rx: mpsc::Receiver<u32>,
    restart: Arc<AtomicBool>,
}

/// Producer half of a [`DecoderSource`].
#[derive(Debug)]
pub struct DecoderFeed {
    units: mpsc::Sender<u32>,
    restart: Arc<AtomicBool>,
}

impl DecoderSource {
    /// Creates a source and the feed that delivers units into it.
    #[must_use]
    pub fn channel(capacity: usize) -> (DecoderFeed, Self) {
        let (units, rx) = mpsc::channel(capacity);
        let restart = Arc::new(AtomicBool::new(false));
        (
            DecoderFeed {
                units,
                restart: Arc::clone(&restart),
            },
            Self { rx, restart },
        )
    }
}

impl ByteSource for DecoderSource {
    fn try_read(&mut self) -> Option<u8> {
        self.rx.try_recv().ok().map(unit_byte)
    }

    fn discard(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    fn restart(&mut self) {
        self.restart.store(true, Ordering::Release);
    }

    fn kind(&self) -> SourceKind {
        SourceKind::BitDecoder
    }
}

impl DecoderFeed {
    /// Pushes one unit, waiting if the source is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the source was dropped.
    pub async fn push(&self, unit: u32) -> Result<()> {
        self.units.send(unit).await.map_err(|_| Error::NotConnected)
    }

    /// Returns true (once) if the source asked for a receiver restart.
    #[must_use]
    pub fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    /// Decodes pin samples read from `reader` until it ends.
    ///
    /// Each byte read is one sample; bit 0 is the line level.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the sample stream ends.
    pub async fn run<R: AsyncRead + Unpin>(self, mut reader: R) -> Result<()> {
        let mut decoder = BitDecoder::new();
        let mut buf = [0u8; 512];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "sample stream ended",
                )));
            }

            if self.take_restart() {
                decoder.reset();
            }

            for &sample in &buf[..n] {
                if let Some(unit) = decoder.feed(sample & 0x01 != 0) {
                    if self.push(unit).await.is_err() {
                        tracing::debug!("decoder source dropped");
                        return Ok(());
                    }
                }
            }
        }
    }
}
