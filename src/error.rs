//! Error types for the packwatch agent.

use thiserror::Error;

/// The main error type for packwatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding/decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote document could not be fetched or understood.
    #[error("fetch failed: {message}")]
    Fetch { message: String },

    /// The metrics sink rejected a batch.
    #[error("post rejected with status {status}")]
    Post { status: u16 },

    /// Staging or publishing an update failed.
    #[error("install failed: {reason}")]
    Install { reason: String },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Run-enable input was deasserted at startup.
    #[error("run-enable input is deasserted")]
    RunDisabled,

    /// The bus is not connected.
    #[error("not connected")]
    NotConnected,
}

/// Frame-specific errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is not exactly the fixed frame length.
    #[error("bad frame length: expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    /// Trailing checksum byte does not match the computed checksum.
    #[error("checksum mismatch: computed {computed:#04x}, frame carries {received:#04x}")]
    Checksum { computed: u8, received: u8 },
}

/// Result type alias for packwatch operations.
pub type Result<T> = std::result::Result<T, Error>;
