//! Serial transmission timing.
//!
//! All read timeouts in the protocol are derived from the time it takes to
//! put a number of bytes on the wire at the current baud rate, so they are
//! recomputed whenever the baud rate changes.

use std::time::Duration;

use crate::protocol::frame::FRAME_LEN;

/// Bits per transmitted byte: start bit, 8 data bits, 2 stop bits.
pub const BITS_PER_BYTE: u64 = 11;

/// Fixed margin added to the beacon poll timeout.
pub const BEACON_POLL_MARGIN: Duration = Duration::from_millis(10);

/// Fixed margin added to the page acknowledgment timeout.
pub const PAGE_ACK_MARGIN: Duration = Duration::from_millis(100);

/// Length of the bootloader beacon.
pub const BEACON_LEN: usize = 4;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Time needed to transmit `bytes` bytes at `baud` bits per second.
///
/// A baud rate of zero is treated as one.
pub fn transmit_time(bytes: usize, baud: u32) -> Duration {
    let bits = (bytes as u64).saturating_mul(BITS_PER_BYTE);
    let nanos = bits.saturating_mul(NANOS_PER_SEC) / u64::from(baud.max(1));
    Duration::from_nanos(nanos)
}

/// Read timeout for one 4-byte beacon poll.
pub fn beacon_read_timeout(baud: u32) -> Duration {
    BEACON_POLL_MARGIN + transmit_time(BEACON_LEN, baud)
}

/// Read timeout for the acknowledgment of one page frame.
pub fn page_ack_timeout(baud: u32) -> Duration {
    PAGE_ACK_MARGIN + transmit_time(FRAME_LEN, baud)
}
