//! Transport abstraction for the upload protocol.
//!
//! The protocol layer never talks to a serial device directly. It drives a
//! [`Port`], which provides a duplex byte channel with reconfigurable line
//! settings, read timeouts and explicit buffer resets:
//!
//! ```text
//! +------------------+
//! |  Upload Session  |
//! | (wake, beacon,   |
//! |  page frames)    |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Port Trait     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use pageflash::port::{LineSettings, Port};
//!
//! fn example<P: Port>(port: &mut P) -> pageflash::Result<()> {
//!     port.apply_settings(&LineSettings::new(115200))?;
//!     port.write_all_bytes(b"Hello")?;
//!
//!     let reply = port.read_bytes(4)?;
//!     println!("Received: {reply:02X?}");
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Serial port configuration used when opening a port.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Line settings applied at open time.
    pub line: LineSettings,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            line: LineSettings::default(),
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            line: LineSettings::new(baud_rate),
            ..Default::default()
        }
    }
}

/// Line settings that may change while the port is open.
///
/// Frames are always 8 data bits without parity; only the baud rate and the
/// stop bits vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Stop bits.
    pub stop_bits: StopBits,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::new(115200)
    }
}

impl LineSettings {
    /// 8N1 at the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            stop_bits: StopBits::One,
        }
    }

    /// Set the stop bits.
    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Byte channel consumed by the upload protocol.
///
/// Reads are bounded by the timeout set through [`Port::set_timeout`]; an
/// implementation signals "nothing arrived in time" with an
/// [`ErrorKind::TimedOut`] I/O error, as the `serialport` crate does.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Reconfigure baud rate and stop bits.
    fn apply_settings(&mut self, settings: &LineSettings) -> Result<()>;

    /// Get the current line settings.
    fn settings(&self) -> LineSettings;

    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Discard bytes written but not yet transmitted.
    fn clear_output(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Read up to `max_len` bytes.
    ///
    /// Keeps reading until `max_len` bytes arrived or the current timeout
    /// elapsed, whichever comes first. A short (possibly empty) result means
    /// the timeout expired.
    fn read_bytes(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout();
        let mut buf = vec![0u8; max_len];
        let mut filled = 0;

        while filled < max_len {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(Error::Io(e)),
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
