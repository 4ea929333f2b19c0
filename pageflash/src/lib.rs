//! # pageflash
//!
//! Upload firmware to a page-based serial bootloader.
//!
//! This crate implements the host side of the protocol:
//!
//! - Image segmentation into 1024-byte pages padded with 0xFF
//! - Page frames (sync marker, page index, 8-bit checksum, payload)
//! - Bootloader beacon handshake
//! - Optional Modbus-style wake command with CRC-16/MODBUS
//! - Per-page acknowledgment and whole-upload retries
//!
//! ## Features
//!
//! - `native` (default): Serial port support via the `serialport` crate
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use pageflash::{FirmwareImage, UploadConfig, WakeConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     let config = UploadConfig::default()
//!         .with_start_offset(1)
//!         .with_wake(WakeConfig::default());
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut session = pageflash::UploadSession::open("/dev/ttyUSB0", config)?;
//!         session.run_with_progress(&image, |event| println!("{event:?}"))?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    image::{FILL_BYTE, FirmwareImage, PAGE_SIZE, Page, segment},
    port::{LineSettings, Port, SerialConfig, StopBits},
    protocol::{
        ACK, BEACON, PageFrame, PageNumbering, WakeCommand, WakeConfig, command_checksum,
        page_checksum, transmit_time,
    },
    session::{
        AbortReason, AttemptOutcome, MAX_RETRIES, UploadConfig, UploadEvent, UploadReport,
        UploadSession,
    },
};
