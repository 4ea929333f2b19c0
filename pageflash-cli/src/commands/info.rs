//! Firmware info command implementation.

use anyhow::Result;
use console::style;
use pageflash::{FirmwareImage, PAGE_SIZE, PageFrame, PageNumbering};
use std::path::Path;

/// One row of the page table, in transmission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageRow {
    /// Position in the upload (0 = first frame sent).
    pub position: usize,
    /// Page index on the wire.
    pub index: u8,
    /// Frame checksum.
    pub checksum: u8,
    /// Offset of the page within the image.
    pub offset: usize,
}

/// Compute the frames an upload of `image` would send.
pub(crate) fn page_table(image: &FirmwareImage, numbering: PageNumbering) -> Result<Vec<PageRow>> {
    let pages = image.pages();
    let indices = numbering.sequence(pages.len())?;
    let last = pages.len() - 1;

    Ok(pages
        .iter()
        .rev()
        .zip(indices)
        .enumerate()
        .map(|(position, (page, index))| PageRow {
            position,
            index,
            checksum: PageFrame::new(index, page).checksum(),
            offset: (last - position) * PAGE_SIZE,
        })
        .collect())
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, start: u8, crypt: bool, json: bool) -> Result<()> {
    let image = FirmwareImage::from_file(firmware)?;
    let rows = page_table(&image, PageNumbering::new(start, crypt))?;

    if json {
        let pages: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "position": row.position,
                    "index": row.index,
                    "checksum": row.checksum,
                    "offset": format!("0x{:08X}", row.offset),
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "file": firmware.display().to_string(),
                "size": image.len(),
                "page_size": PAGE_SIZE,
                "page_count": rows.len(),
                "start": start,
                "crypt": crypt,
                "pages": pages,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("📦").cyan(),
        style(firmware.display()).green()
    );
    eprintln!("\n{}", style("Image").bold().underlined());
    eprintln!("  Size: {} bytes", image.len());
    eprintln!("  Pages: {} x {} bytes", rows.len(), PAGE_SIZE);
    eprintln!(
        "  Padding: {} bytes",
        rows.len() * PAGE_SIZE - image.len()
    );
    eprintln!("  Start index: {start}");
    eprintln!("  Crypt: {}", if crypt { "yes" } else { "no" });

    eprintln!("\n{}", style("Transmission order").bold().underlined());
    eprintln!(
        "  {:>5}  {:>5}  {:>8}  {:>10}",
        style("#").dim(),
        style("Index").dim(),
        style("Checksum").dim(),
        style("Offset").dim()
    );
    for row in &rows {
        eprintln!(
            "  {:>5}  {:>5}  {:>8}  {:>10}",
            row.position + 1,
            format!("{:#04x}", row.index),
            format!("{:#04x}", row.checksum),
            format!("0x{:08X}", row.offset)
        );
    }

    Ok(())
}
