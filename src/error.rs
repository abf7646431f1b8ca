//! Error types for vesper-io

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// vesper-io error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),

    /// No ACK from the device. Raised only after the connection check
    /// has already reset the link and retried once.
    #[error("Handshake failed: {0}")]
    Handshake(&'static str),

    /// MCU echoed a different sample count than was sent
    #[error("Length mismatch: sent {sent} samples, device echoed {echoed}")]
    LengthMismatch {
        /// Sample count written to the device
        sent: u16,
        /// Sample count the device echoed back
        echoed: u16,
    },

    /// Upload verification CRC did not match
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// CRC computed locally over the uploaded samples
        expected: u32,
        /// CRC the device reported
        actual: u32,
    },

    /// Parameter rejected before any transmission was attempted
    #[error("Validation error: {0}")]
    Validation(String),

    /// State-machine contract violation (e.g. polling a job that was
    /// never started)
    #[error("Misuse: {0}")]
    Misuse(&'static str),

    /// Unexpected byte or opcode on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
