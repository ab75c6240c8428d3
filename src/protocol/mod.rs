//! Pack wire protocol.
//!
//! This module contains the low-level protocol pieces:
//! - Fixed-length frames and checksum validation
//! - Telemetry decoding
//! - The keep-alive command

pub mod command;
pub mod frame;
pub mod parser;

pub use command::{KEEP_ALIVE, keep_alive};
pub use frame::{FRAME_LEN, Frame, PAYLOAD_LEN, checksum};
pub use parser::parse_telemetry;
