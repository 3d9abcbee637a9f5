//! 8.3 short names for log files
//!
//! A FAT short name cannot hold `"00042 2024-05-02-10-00-00.log"`, so a
//! session file is kept in a directory named after the device id, under its
//! boot time as seconds since 2000-01-01 in seven base-36 digits:
//!
//! ```text
//! 00042 2024-05-02-10-00-00.log  <->  00042/0CP8140.LOG
//! ```
//!
//! Names that already are 8.3 live in the root directory unchanged.

use core::fmt::Write;

use hal_abstractions::{DateTime, FileName, StorageError};
use heapless::String;

use crate::config::LOG_EXTENSION;
use crate::session::file_name;
use crate::time;

/// `NNNNNNNN.EEE`
pub type ShortName = String<12>;

/// One directory level, at most eight characters
pub type ShortDir = String<8>;

const STAMP_LEN: usize = 7;
const STAMP_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SHORT_EXTENSION: &str = "LOG";

/// Location of a file on a short-name volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortPath {
    /// Device directory; `None` for files in the root
    pub dir: Option<ShortDir>,
    pub file: ShortName,
}

fn is_short_part(part: &str, max: usize) -> bool {
    !part.is_empty()
        && part.len() <= max
        && part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'~'))
}

/// `true` if `name` is already a plain 8.3 name
pub fn is_short(name: &str) -> bool {
    match name.split_once('.') {
        Some((base, ext)) => is_short_part(base, 8) && is_short_part(ext, 3),
        None => is_short_part(name, 8),
    }
}

/// Device id of a device directory name (`"00042"`)
pub fn parse_device_dir(name: &str) -> Option<u16> {
    if name.len() != 5 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Device id and boot time of a session file name
pub fn parse_session_name(name: &str) -> Option<(u16, DateTime)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(LOG_EXTENSION) {
        return None;
    }
    let (id, boot) = stem.split_once(' ')?;
    Some((parse_device_dir(id)?, time::parse_long(boot)?))
}

/// Where `name` is stored on a short-name volume
pub fn to_short(name: &str) -> Result<ShortPath, StorageError> {
    if is_short(name) {
        let file = ShortName::try_from(name).map_err(|_| StorageError::InvalidName)?;
        return Ok(ShortPath { dir: None, file });
    }
    let (device_id, boot) = parse_session_name(name).ok_or(StorageError::InvalidName)?;

    let mut stamp = [b'0'; STAMP_LEN];
    let mut seconds = time::seconds_since_epoch(&boot);
    for digit in stamp.iter_mut().rev() {
        *digit = STAMP_DIGITS[(seconds % 36) as usize];
        seconds /= 36;
    }
    let stamp = core::str::from_utf8(&stamp).map_err(|_| StorageError::InvalidName)?;

    let mut dir = ShortDir::new();
    let mut file = ShortName::new();
    write!(dir, "{:05}", device_id).map_err(|_| StorageError::InvalidName)?;
    write!(file, "{}.{}", stamp, SHORT_EXTENSION).map_err(|_| StorageError::InvalidName)?;
    Ok(ShortPath {
        dir: Some(dir),
        file,
    })
}

/// Name reported to the host for `base`.`ext` found in `dir`
///
/// Inverse of [`to_short`]. Files in a device directory that no session
/// wrote give `None`.
pub fn from_short(dir: Option<&str>, base: &str, ext: &str) -> Option<FileName> {
    let Some(dir) = dir else {
        let mut name = FileName::new();
        name.push_str(base).ok()?;
        if !ext.is_empty() {
            name.push('.').ok()?;
            name.push_str(ext).ok()?;
        }
        return Some(name);
    };

    let device_id = parse_device_dir(dir)?;
    if base.len() != STAMP_LEN || !ext.eq_ignore_ascii_case(LOG_EXTENSION) {
        return None;
    }
    let mut seconds = 0u32;
    for c in base.chars() {
        seconds = seconds.checked_mul(36)?.checked_add(c.to_digit(36)?)?;
    }
    let boot = time::from_seconds_since_epoch(seconds)?;
    Some(file_name(device_id, &boot))
}
