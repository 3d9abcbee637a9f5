//! Response vocabulary
//!
//! Numbers are rendered as decimal text. Raw file bytes follow a header's
//! trailing space directly and are closed by `$FILE-END`.

use core::fmt::Write;

use hal_abstractions::{Capacity, DateTime, FileEntry};
use heapless::String;

use crate::time;

pub const OK: &[u8] = b"$OK";
pub const ERROR: &[u8] = b"$ERROR";
pub const FILE_END: &[u8] = b"$FILE-END";

/// Longest header line: `$FILE-ENTRY 4294967295 <64-byte name> `
pub const LINE_LEN: usize = 96;

pub type Line = String<LINE_LEN>;

/// Header did not fit [`LINE_LEN`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

fn render(args: core::fmt::Arguments<'_>) -> Result<Line, Overflow> {
    let mut line = Line::new();
    line.write_fmt(args).map_err(|_| Overflow)?;
    Ok(line)
}

/// `<id> <total sectors> <free sectors> <sector size> YY-MM-DD-HH-mm-ss`
pub fn info(device_id: u16, capacity: &Capacity, now: &DateTime) -> Result<Line, Overflow> {
    render(format_args!(
        "{:05} {} {} {} {}",
        device_id,
        capacity.total_sectors,
        capacity.free_sectors,
        capacity.sector_size,
        time::format_short(now)
    ))
}

/// `$FILE-ENTRY <size> <name>`, listing form
pub fn entry(entry: &FileEntry) -> Result<Line, Overflow> {
    render(format_args!("$FILE-ENTRY {} {}", entry.size, entry.name))
}

/// `$FILE-ENTRY <size> <name> `, followed by the file contents
pub fn entry_with_content(entry: &FileEntry) -> Result<Line, Overflow> {
    render(format_args!("$FILE-ENTRY {} {} ", entry.size, entry.name))
}

/// `$FILE-START <size> `, followed by the file contents
pub fn file_start(size: u32) -> Result<Line, Overflow> {
    render(format_args!("$FILE-START {} ", size))
}
