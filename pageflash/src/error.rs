//! Error types for pageflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::session::AbortReason;

/// Result type for pageflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pageflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error after the port was opened.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial port could not be opened.
    #[cfg(feature = "native")]
    #[error("Cannot open serial port {port}: {source}")]
    PortOpen {
        /// Port name/path that was requested.
        port: String,
        /// Underlying serial port error.
        source: serialport::Error,
    },

    /// Firmware image does not exist.
    #[error("Firmware file not found: {}", .0.display())]
    FirmwareNotFound(PathBuf),

    /// Every upload attempt was aborted.
    #[error("Upload failed after {attempts} attempts (last: {last})")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Reason the final attempt was aborted.
        last: AbortReason,
    },

    /// The image has more pages than the one-byte page index can address.
    #[error("Page index {highest:#x} does not fit in one byte")]
    PageIndexOverflow {
        /// Index the first transmitted page would need.
        highest: u32,
    },

    /// Invalid upload settings.
    #[error("Configuration error: {0}")]
    Config(String),
}
