//! Per-pack channel decoders.
//!
//! A [`Channel`] accumulates bytes from one [`ByteSource`] until a full frame
//! is buffered, then validates it. Channels are shared between the poll loop
//! and the keep-alive broadcaster through a [`ChannelBank`], which guards each
//! one with its own lock.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::FrameError;
use crate::protocol::frame::{FRAME_LEN, Frame};
use crate::transport::{ByteSource, SourceKind};

/// Upper bound on packs handled by one agent.
pub const MAX_CHANNELS: usize = 8;

/// Counters kept per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames that passed validation.
    pub frames: u64,
    /// Frames dropped for a bad checksum.
    pub checksum_errors: u64,
    /// Resets, from any cause.
    pub resets: u64,
}

/// A full frame that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// The bytes as received.
    pub raw: [u8; FRAME_LEN],
    /// Why validation failed.
    pub error: FrameError,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bad CRC: {}", hex::encode(self.raw))
    }
}

impl std::error::Error for Rejected {}

/// One pack's byte source plus its accumulation state.
pub struct Channel {
    name: String,
    source: Box<dyn ByteSource>,
    buf: [u8; FRAME_LEN],
    cursor: usize,
    stats: ChannelStats,
}

impl Channel {
    /// Creates a channel bound to `source`.
    pub fn new(name: impl Into<String>, source: impl ByteSource + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
            buf: [0; FRAME_LEN],
            cursor: 0,
            stats: ChannelStats::default(),
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the underlying source.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    /// Number of bytes accumulated towards the next frame.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Channel counters.
    #[must_use]
    pub const fn stats(&self) -> ChannelStats {
        self.stats
    }

    /// Drops pending source data and any partial frame.
    pub fn reset(&mut self) {
        let dropped = self.source.discard();
        self.source.restart();
        if dropped > 0 || self.cursor > 0 {
            tracing::trace!(
                channel = %self.name,
                dropped,
                partial = self.cursor,
                "channel reset"
            );
        }
        self.cursor = 0;
        self.stats.resets += 1;
    }

    /// Pulls whatever the source has buffered, stopping at a full frame.
    ///
    /// Returns the frame once [`FRAME_LEN`] bytes are accumulated and the
    /// checksum matches, or `Ok(None)` while a frame is still incomplete.
    ///
    /// # Errors
    ///
    /// On a checksum mismatch the channel is reset and the rejected bytes are
    /// returned for reporting. They are not retried.
    pub fn drain(&mut self) -> Result<Option<Frame>, Rejected> {
        while self.cursor < FRAME_LEN {
            let Some(byte) = self.source.try_read() else {
                break;
            };
            self.buf[self.cursor] = byte;
            self.cursor += 1;
        }

        if self.cursor < FRAME_LEN {
            return Ok(None);
        }

        self.cursor = 0;
        match Frame::validate(&self.buf) {
            Ok(frame) => {
                self.stats.frames += 1;
                tracing::debug!(channel = %self.name, "frame accepted");
                Ok(Some(frame))
            }
            Err(error) => {
                self.stats.checksum_errors += 1;
                let rejected = Rejected {
                    raw: self.buf,
                    error,
                };
                tracing::debug!(channel = %self.name, "frame rejected: {}", rejected.error);
                self.reset();
                Err(rejected)
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.source.kind())
            .field("cursor", &self.cursor)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// The set of channels shared by the poll loop and the broadcaster.
#[derive(Debug, Clone, Default)]
pub struct ChannelBank {
    channels: Vec<Arc<Mutex<Channel>>>,
}

impl ChannelBank {
    /// Creates a bank from channels, in polling order.
    #[must_use]
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: channels
                .into_iter()
                .map(|c| Arc::new(Mutex::new(c)))
                .collect(),
        }
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if the bank has no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Returns the shared handle of channel `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<Mutex<Channel>>> {
        self.channels.get(index)
    }

    /// Iterates over the shared channel handles.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Mutex<Channel>>> {
        self.channels.iter()
    }

    /// Resets every channel, one lock at a time.
    pub async fn reset_all(&self) {
        for channel in &self.channels {
            channel.lock().await.reset();
        }
    }
}
