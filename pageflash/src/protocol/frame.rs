//! Page frames and page numbering.
//!
//! ## Frame Format
//!
//! Every page is sent as one frame:
//!
//! ```text
//! +------------+-------+----------+------------------+
//! |    Sync    | Index | Checksum |     Payload      |
//! +------------+-------+----------+------------------+
//! |   4 bytes  |   1   |    1     |    1024 bytes    |
//! +------------+-------+----------+------------------+
//! | DE AD BE EF| page# | crc211   |  page contents   |
//! +------------+-------+----------+------------------+
//! ```
//!
//! The bootloader answers each frame with a single [`ACK`] byte. Pages go out
//! last to first, so the first frame carries the highest page number.

use crate::error::{Error, Result};
use crate::image::{PAGE_SIZE, Page};
use crate::protocol::checksum::page_checksum;

/// Frame synchronization marker, transmitted big-endian.
pub const SYNC_MARKER: u32 = 0xDEADBEEF;

/// Sync marker, index and checksum.
pub const FRAME_HEADER_LEN: usize = 6;

/// Total length of one page frame on the wire.
pub const FRAME_LEN: usize = FRAME_HEADER_LEN + PAGE_SIZE;

/// Byte the bootloader sends to acknowledge a page.
pub const ACK: u8 = 0xAA;

/// Offset added to every page index in crypt mode.
pub const CRYPT_INDEX_OFFSET: u8 = 0x80;

/// Maps transmission positions to on-wire page indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageNumbering {
    start_offset: u8,
    crypt: bool,
}

impl PageNumbering {
    /// Create a numbering scheme.
    ///
    /// `start_offset` is the index carried by the first page of the image
    /// (the last frame sent). `crypt` adds [`CRYPT_INDEX_OFFSET`] to every
    /// index.
    pub fn new(start_offset: u8, crypt: bool) -> Self {
        Self {
            start_offset,
            crypt,
        }
    }

    /// Index of the frame at transmission position `position` (0 = first
    /// frame sent, which is the last page of the image).
    ///
    /// Returns `None` if the position is out of range or the index does not
    /// fit in one byte.
    pub fn index(&self, total_pages: usize, position: usize) -> Option<u8> {
        if position >= total_pages {
            return None;
        }
        let base = (total_pages - position - 1) as u64 + u64::from(self.start_offset);
        let index = if self.crypt {
            base + u64::from(CRYPT_INDEX_OFFSET)
        } else {
            base
        };
        u8::try_from(index).ok()
    }

    /// All indices of an upload in transmission order.
    ///
    /// Fails with [`Error::PageIndexOverflow`] when the highest index would
    /// not fit in one byte.
    pub fn sequence(&self, total_pages: usize) -> Result<Vec<u8>> {
        if total_pages == 0 {
            return Ok(Vec::new());
        }
        if self.index(total_pages, 0).is_none() {
            let crypt = if self.crypt {
                u32::from(CRYPT_INDEX_OFFSET)
            } else {
                0
            };
            let highest = u32::try_from(total_pages - 1)
                .unwrap_or(u32::MAX)
                .saturating_add(u32::from(self.start_offset))
                .saturating_add(crypt);
            return Err(Error::PageIndexOverflow { highest });
        }
        Ok((0..total_pages)
            .filter_map(|position| self.index(total_pages, position))
            .collect())
    }
}

/// One page frame ready for transmission.
#[derive(Debug)]
pub struct PageFrame<'a> {
    index: u8,
    page: &'a Page,
}

impl<'a> PageFrame<'a> {
    /// Create a frame carrying `page` under `index`.
    pub fn new(index: u8, page: &'a Page) -> Self {
        Self { index, page }
    }

    /// On-wire page index.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Checksum byte of the payload.
    pub fn checksum(&self) -> u8 {
        page_checksum(self.page.as_bytes())
    }

    /// Sync marker, index and checksum.
    pub fn header(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[..4].copy_from_slice(&SYNC_MARKER.to_be_bytes());
        header[4] = self.index;
        header[5] = self.checksum();
        header
    }

    /// Page payload.
    pub fn payload(&self) -> &[u8] {
        self.page.as_bytes()
    }

    /// Complete frame as transmitted.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_LEN);
        frame.extend_from_slice(&self.header());
        frame.extend_from_slice(self.payload());
        frame
    }
}
