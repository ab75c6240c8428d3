//! Telemetry frame decoding.
//!
//! Frame layout (offsets into the 36-byte frame):
//! ```text
//! [3]      status flags
//! [5]      state of charge %
//! [7..10]  temperatures: max cell, avg cell, discharge FET (°C)
//! [10]     microcontroller temperature (°C)
//! [11..13] cycle count, u16 LE
//! [13]     charger state
//! [21..23] pack voltage, u16 LE, mV
//! [25..27] current, i16 BE, mA
//! [29..31] highest cell, u16 LE, mV
//! [31..33] lowest cell, u16 LE, mV
//! [35]     checksum
//! ```
//! Byte order differs between fields; each reader below is explicit.

use crate::protocol::frame::Frame;
use crate::types::{ChargerState, StatusFlags, TelemetrySample, Temperatures};

const STATUS: usize = 3;
const SOC: usize = 5;
const TEMP_MAX_CELL: usize = 7;
const TEMP_AVG_CELL: usize = 8;
const TEMP_DISCHARGE_FET: usize = 9;
const TEMP_MICROCONTROLLER: usize = 10;
const CYCLES: usize = 11;
const CHARGER_STATE: usize = 13;
const PACK_VOLTAGE: usize = 21;
const CURRENT: usize = 25;
const CELL_HIGH: usize = 29;
const CELL_LOW: usize = 31;

/// Millivolts/milliamps to volts/amps.
const MILLI: f64 = 1000.0;

/// Decodes a validated frame into a [`TelemetrySample`].
#[must_use]
pub fn parse_telemetry(frame: &Frame) -> TelemetrySample {
    TelemetrySample {
        soc: frame.byte(SOC),
        cycles: frame.u16_le(CYCLES),
        voltage: f64::from(frame.u16_le(PACK_VOLTAGE)) / MILLI,
        current: f64::from(frame.i16_be(CURRENT)) / MILLI,
        cell_high: f64::from(frame.u16_le(CELL_HIGH)) / MILLI,
        cell_low: f64::from(frame.u16_le(CELL_LOW)) / MILLI,
        flags: StatusFlags::from_byte(frame.byte(STATUS)),
        charger: ChargerState::from_byte(frame.byte(CHARGER_STATE)),
        temperatures: Temperatures {
            max_cell: frame.byte(TEMP_MAX_CELL),
            avg_cell: frame.byte(TEMP_AVG_CELL),
            discharge_fet: frame.byte(TEMP_DISCHARGE_FET),
            microcontroller: frame.byte(TEMP_MICROCONTROLLER),
        },
    }
}
