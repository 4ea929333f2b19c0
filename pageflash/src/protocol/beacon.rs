//! Bootloader ready beacon.

use log::{debug, trace};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::port::Port;
use crate::protocol::timing::{BEACON_LEN, beacon_read_timeout};

/// Sequence the bootloader emits while waiting for frames.
pub const BEACON: [u8; BEACON_LEN] = [0xFE, 0xE1, 0xDE, 0xAD];

/// Poll the port until the beacon arrives.
///
/// Reads exactly [`BEACON_LEN`] bytes per poll and compares the chunk as a
/// whole. Sets the port timeout to [`beacon_read_timeout`] for the current
/// baud rate. With `limit == None` this blocks until the beacon shows up.
///
/// Returns `Ok(false)` if `limit` elapsed without a beacon.
pub fn wait_for_beacon<P: Port + ?Sized>(port: &mut P, limit: Option<Duration>) -> Result<bool> {
    let baud = port.settings().baud_rate;
    port.set_timeout(beacon_read_timeout(baud))?;
    debug!("Waiting for bootloader beacon at {baud} baud");

    let start = Instant::now();
    loop {
        let chunk = port.read_bytes(BEACON_LEN)?;
        if chunk == BEACON {
            return Ok(true);
        }
        if !chunk.is_empty() {
            trace!("Ignoring {chunk:02X?}");
        }
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            return Ok(false);
        }
    }
}
