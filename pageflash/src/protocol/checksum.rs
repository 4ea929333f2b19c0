//! Checksums used on the wire.
//!
//! Two independent algorithms feed two different frame types:
//!
//! - [`page_checksum`]: 8-bit accumulator carried as a single byte in every
//!   page frame.
//! - [`command_checksum`]: CRC-16/MODBUS appended little-endian to the wake
//!   command.

/// Seed and multiplier of the page checksum.
const PAGE_CHECKSUM_SEED: u16 = 211;

/// Initial register of CRC-16/MODBUS.
const CRC16_MODBUS_INIT: u16 = 0xFFFF;

/// Reflected polynomial of CRC-16/MODBUS (0x8005 bit-reversed).
const CRC16_MODBUS_POLY: u16 = 0xA001;

/// Compute the 8-bit checksum of a page payload.
///
/// The running value starts at 211. For every byte it adds `byte * 211`
/// modulo 2^16, then folds the high byte into the low byte. The result is the
/// low byte of the running value, so an empty input yields 211.
pub fn page_checksum(data: &[u8]) -> u8 {
    let mut acc = PAGE_CHECKSUM_SEED;
    for &byte in data {
        acc = acc.wrapping_add(u16::from(byte).wrapping_mul(PAGE_CHECKSUM_SEED));
        acc ^= acc >> 8;
    }
    acc.to_le_bytes()[0]
}

/// Compute CRC-16/MODBUS over `data`.
///
/// Bit-by-bit, LSB first. The full 16-bit register is returned; the wire
/// format transmits it low byte first.
pub fn command_checksum(data: &[u8]) -> u16 {
    let mut crc = CRC16_MODBUS_INIT;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC16_MODBUS_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
