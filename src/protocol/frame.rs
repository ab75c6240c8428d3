//! Fixed-length telemetry frames and their checksum.
//!
//! Packs stream frames back to back with no header or length prefix:
//! ```text
//! ┌─────────────────────────────┬──────────┐
//! │        payload              │ checksum │
//! │        35 bytes             │  1 byte  │
//! └─────────────────────────────┴──────────┘
//! ```
//!
//! The checksum is a reflected 8-bit CRC (feedback `0x8C`, seed 0) computed
//! bit by bit over the payload, least significant bit first.

use crate::error::FrameError;

/// Length of a telemetry frame in bytes.
pub const FRAME_LEN: usize = 36;

/// Number of leading bytes covered by the checksum.
pub const PAYLOAD_LEN: usize = FRAME_LEN - 1;

/// Reflected feedback polynomial of the frame checksum.
pub const CHECKSUM_FEEDBACK: u8 = 0x8C;

/// Computes the frame checksum over `data`.
#[must_use]
pub const fn checksum(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    let mut i = 0;
    while i < data.len() {
        let mut extract = data[i];
        let mut bit = 0;
        while bit < 8 {
            let feedback = (crc ^ extract) & 0x01;
            crc >>= 1;
            if feedback != 0 {
                crc ^= CHECKSUM_FEEDBACK;
            }
            extract >>= 1;
            bit += 1;
        }
        i += 1;
    }
    crc
}

/// A checksum-verified telemetry frame.
///
/// A `Frame` can only be obtained through [`Frame::validate`],
/// [`Frame::from_bytes`] or [`Frame::seal`], so its fields are always safe to
/// decode.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Verifies the trailing checksum of a complete accumulation.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Checksum`] if byte 35 does not match the
    /// checksum of bytes 0..35.
    pub const fn validate(buf: &[u8; FRAME_LEN]) -> Result<Self, FrameError> {
        let (payload, _) = buf.split_at(PAYLOAD_LEN);
        let computed = checksum(payload);
        let received = buf[PAYLOAD_LEN];
        if computed == received {
            Ok(Self(*buf))
        } else {
            Err(FrameError::Checksum { computed, received })
        }
    }

    /// Length-checks and validates an arbitrary byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Length`] if `bytes` is not exactly
    /// [`FRAME_LEN`] long, or [`FrameError::Checksum`] on a mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let buf: &[u8; FRAME_LEN] = bytes.try_into().map_err(|_| FrameError::Length {
            expected: FRAME_LEN,
            got: bytes.len(),
        })?;
        Self::validate(buf)
    }

    /// Builds a frame from a payload, appending its checksum.
    #[must_use]
    pub const fn seal(payload: &[u8; PAYLOAD_LEN]) -> Self {
        let mut buf = [0u8; FRAME_LEN];
        let mut i = 0;
        while i < PAYLOAD_LEN {
            buf[i] = payload[i];
            i += 1;
        }
        buf[PAYLOAD_LEN] = checksum(payload);
        Self(buf)
    }

    /// Returns the raw frame bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Returns the byte at `offset`.
    #[must_use]
    pub const fn byte(&self, offset: usize) -> u8 {
        self.0[offset]
    }

    /// Reads a little-endian `u16` starting at `offset`.
    #[must_use]
    pub const fn u16_le(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.0[offset], self.0[offset + 1]])
    }

    /// Reads a big-endian `i16` starting at `offset`.
    #[must_use]
    pub const fn i16_be(&self, offset: usize) -> i16 {
        i16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    /// Returns the frame as a hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({})", self.to_hex())
    }
}
