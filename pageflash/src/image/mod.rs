//! Firmware image loading and page segmentation.
//!
//! The bootloader only understands whole pages. An image is cut into
//! [`PAGE_SIZE`] chunks in order; the last chunk is padded with
//! [`FILL_BYTE`]. There is no length field on the wire, so the target relies
//! on every page being exactly [`PAGE_SIZE`] bytes.

use std::fs;
use std::io;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Size of one page in bytes.
pub const PAGE_SIZE: usize = 1024;

/// Padding byte for the tail of the last page.
pub const FILL_BYTE: u8 = 0xFF;

/// Raw firmware image, read once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap bytes already in memory.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Read an image from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::FirmwareNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        debug!("Loaded {} ({} bytes)", path.display(), data.len());
        Ok(Self { data })
    }

    /// Image contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of pages the image occupies (at least one).
    pub fn page_count(&self) -> usize {
        self.data.len().div_ceil(PAGE_SIZE).max(1)
    }

    /// Split into pages.
    pub fn pages(&self) -> Vec<Page> {
        segment(&self.data)
    }
}

/// One padded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page(Box<[u8]>);

impl Page {
    /// Page contents, always [`PAGE_SIZE`] bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Split `data` into [`PAGE_SIZE`] pages.
///
/// An empty input still yields one page made entirely of [`FILL_BYTE`].
pub fn segment(data: &[u8]) -> Vec<Page> {
    segment_with_size(data, PAGE_SIZE)
}

fn segment_with_size(data: &[u8], page_size: usize) -> Vec<Page> {
    if data.is_empty() {
        return vec![Page(vec![FILL_BYTE; page_size].into_boxed_slice())];
    }

    data.chunks(page_size)
        .map(|chunk| {
            let mut page = vec![FILL_BYTE; page_size];
            page[..chunk.len()].copy_from_slice(chunk);
            Page(page.into_boxed_slice())
        })
        .collect()
}
