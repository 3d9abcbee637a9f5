//! Record timestamps and the host date-time text format
//!
//! Record time is milliseconds since the start of the month the device booted
//! in: the RTC is read once at session start, converted with
//! [`month_offset_ms`], and the millisecond uptime is added from then on. A
//! 31-day month is 2_678_400_000 ms, which fits in `u32`; sessions running
//! past ~49 days wrap.

use core::fmt::Write;

use hal_abstractions::rtc::{days_in_month, is_leap_year};
use hal_abstractions::DateTime;
use heapless::String;

const MS_PER_SECOND: u32 = 1_000;
const MS_PER_MINUTE: u32 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u32 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u32 = 24 * MS_PER_HOUR;

const SECONDS_PER_DAY: u32 = 86_400;

/// Length of `YY-MM-DD-HH-mm-ss`
pub const SHORT_FORMAT_LEN: usize = 17;

/// Length of `YYYY-MM-DD-HH-mm-ss`
pub const LONG_FORMAT_LEN: usize = 19;

/// Milliseconds elapsed since 00:00:00 on the first of `datetime`'s month
pub fn month_offset_ms(datetime: &DateTime) -> u32 {
    (datetime.day() as u32 - 1) * MS_PER_DAY
        + datetime.hour() as u32 * MS_PER_HOUR
        + datetime.minute() as u32 * MS_PER_MINUTE
        + datetime.second() as u32 * MS_PER_SECOND
}

/// Record timestamp from the boot offset and uptime
pub fn timestamp(boot_offset_ms: u32, uptime_ms: u64) -> u32 {
    boot_offset_ms.wrapping_add(uptime_ms as u32)
}

/// `YY-MM-DD-HH-mm-ss`, as exchanged with the host
pub fn format_short(datetime: &DateTime) -> String<SHORT_FORMAT_LEN> {
    let mut out = String::new();
    // Every field is at most two digits, so this always fits
    let _ = write!(
        out,
        "{:02}-{:02}-{:02}-{:02}-{:02}-{:02}",
        datetime.year(),
        datetime.month(),
        datetime.day(),
        datetime.hour(),
        datetime.minute(),
        datetime.second()
    );
    out
}

/// `YYYY-MM-DD-HH-mm-ss`, as used in log file names
pub fn format_long(datetime: &DateTime) -> String<LONG_FORMAT_LEN> {
    let mut out = String::new();
    let _ = write!(
        out,
        "{:04}-{:02}-{:02}-{:02}-{:02}-{:02}",
        datetime.full_year(),
        datetime.month(),
        datetime.day(),
        datetime.hour(),
        datetime.minute(),
        datetime.second()
    );
    out
}

/// Parse `YY-MM-DD-HH-mm-ss`; `None` unless every field is exactly two digits
/// and the result is a valid date
pub fn parse_short(text: &str) -> Option<DateTime> {
    let bytes = text.as_bytes();
    if bytes.len() != SHORT_FORMAT_LEN {
        return None;
    }

    let mut fields = [0u8; 6];
    for (i, field) in fields.iter_mut().enumerate() {
        let at = i * 3;
        if i > 0 && bytes[at - 1] != b'-' {
            return None;
        }
        let (hi, lo) = (bytes[at], bytes[at + 1]);
        if !hi.is_ascii_digit() || !lo.is_ascii_digit() {
            return None;
        }
        *field = (hi - b'0') * 10 + (lo - b'0');
    }

    let [year, month, day, hour, minute, second] = fields;
    DateTime::new(year, month, day, hour, minute, second).ok()
}

/// Parse `YYYY-MM-DD-HH-mm-ss`; only years 2000..=2099 are representable
pub fn parse_long(text: &str) -> Option<DateTime> {
    if text.len() != LONG_FORMAT_LEN {
        return None;
    }
    parse_short(text.strip_prefix("20")?)
}

fn days_in_year(year: u8) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Seconds since [`DateTime::EPOCH`]
pub fn seconds_since_epoch(datetime: &DateTime) -> u32 {
    let year = datetime.year();
    let days = (0..year).map(days_in_year).sum::<u32>()
        + (1..datetime.month())
            .map(|month| days_in_month(year, month) as u32)
            .sum::<u32>()
        + datetime.day() as u32
        - 1;
    days * SECONDS_PER_DAY
        + datetime.hour() as u32 * 3_600
        + datetime.minute() as u32 * 60
        + datetime.second() as u32
}

/// Inverse of [`seconds_since_epoch`]; `None` from 2100 on
pub fn from_seconds_since_epoch(seconds: u32) -> Option<DateTime> {
    let mut days = seconds / SECONDS_PER_DAY;
    let in_day = seconds % SECONDS_PER_DAY;

    let mut year = 0u8;
    while days >= days_in_year(year) {
        days -= days_in_year(year);
        year += 1;
        if year > 99 {
            return None;
        }
    }
    let mut month = 1u8;
    while days >= days_in_month(year, month) as u32 {
        days -= days_in_month(year, month) as u32;
        month += 1;
    }

    DateTime::new(
        year,
        month,
        days as u8 + 1,
        (in_day / 3_600) as u8,
        (in_day % 3_600 / 60) as u8,
        (in_day % 60) as u8,
    )
    .ok()
}
