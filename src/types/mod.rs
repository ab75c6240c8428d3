//! Data types for pack telemetry.

pub mod telemetry;

pub use telemetry::{ChargerState, StatusFlags, TelemetrySample, Temperatures};
