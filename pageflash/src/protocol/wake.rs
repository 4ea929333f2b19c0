//! Optional wake command sent before the bootloader handshake.
//!
//! Some installations route the serial line through an intermediary that has
//! to be switched into pass-through mode first. It is addressed with a
//! Modbus RTU "write single register" request at its own line settings:
//!
//! ```text
//! +---------+------+----------+--------+----------+
//! | Address | 0x06 | Register | Value  |  CRC16   |
//! +---------+------+----------+--------+----------+
//! |    1    |  1   |  2 (BE)  | 2 (BE) |  2 (LE)  |
//! +---------+------+----------+--------+----------+
//! ```

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;
use std::thread;

use crate::error::Result;
use crate::port::{LineSettings, Port, StopBits};
use crate::protocol::checksum::command_checksum;
use crate::protocol::timing::transmit_time;

/// Function code of "write single register".
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Length of the encoded wake command.
pub const WAKE_COMMAND_LEN: usize = 8;

/// Default device address.
pub const DEFAULT_WAKE_ADDRESS: u8 = 32;

/// Default wake baud rate.
pub const DEFAULT_WAKE_BAUD: u32 = 9600;

/// Default register.
pub const DEFAULT_WAKE_REGISTER: u16 = 0xFFFF;

/// Default register value.
pub const DEFAULT_WAKE_VALUE: u16 = 0xDEAD;

/// Wake command parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WakeConfig {
    /// Device address.
    pub address: u8,
    /// Baud rate the intermediary listens at.
    pub baud_rate: u32,
    /// Register to write.
    pub register: u16,
    /// Value to write.
    pub value: u16,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_WAKE_ADDRESS,
            baud_rate: DEFAULT_WAKE_BAUD,
            register: DEFAULT_WAKE_REGISTER,
            value: DEFAULT_WAKE_VALUE,
        }
    }
}

impl WakeConfig {
    /// Line settings for the wake command: wake baud, 8 data bits, no
    /// parity, 2 stop bits.
    pub fn line_settings(&self) -> LineSettings {
        LineSettings::new(self.baud_rate).with_stop_bits(StopBits::Two)
    }

    /// Encode the command.
    pub fn command(&self) -> WakeCommand {
        WakeCommand::new(self.address, self.register, self.value)
    }
}

/// Encoded wake command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeCommand([u8; WAKE_COMMAND_LEN]);

impl WakeCommand {
    /// Build the command for `address`, `register` and `value`.
    pub fn new(address: u8, register: u16, value: u16) -> Self {
        let mut bytes = [0u8; WAKE_COMMAND_LEN];
        bytes[0] = address;
        bytes[1] = WRITE_SINGLE_REGISTER;
        BigEndian::write_u16(&mut bytes[2..4], register);
        BigEndian::write_u16(&mut bytes[4..6], value);
        let crc = command_checksum(&bytes[..6]);
        LittleEndian::write_u16(&mut bytes[6..8], crc);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Send the wake command and wait until it has left the wire.
///
/// Leaves the port at the wake line settings; the caller reconfigures it
/// for the upload afterwards.
pub fn send_wake<P: Port + ?Sized>(port: &mut P, config: &WakeConfig) -> Result<()> {
    let command = config.command();
    debug!(
        "Sending wake command to device {} at {} baud: {:02X?}",
        config.address,
        config.baud_rate,
        command.as_bytes()
    );

    port.apply_settings(&config.line_settings())?;
    port.write_all_bytes(command.as_bytes())?;

    // Drain before the caller changes the baud rate.
    thread::sleep(transmit_time(WAKE_COMMAND_LEN, config.baud_rate));
    Ok(())
}
