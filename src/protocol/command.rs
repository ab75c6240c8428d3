//! Commands written to the shared pack bus.
//!
//! Packs only stream telemetry for a few seconds after they see the
//! keep-alive (unlock) sequence, so it has to be repeated periodically.

use bytes::Bytes;

/// Keep-alive sequence understood by the packs.
pub const KEEP_ALIVE: [u8; 5] = [0x3A, 0x13, 0x01, 0x16, 0x79];

/// Returns the keep-alive command as a buffer ready for the bus.
#[must_use]
pub const fn keep_alive() -> Bytes {
    Bytes::from_static(&KEEP_ALIVE)
}
