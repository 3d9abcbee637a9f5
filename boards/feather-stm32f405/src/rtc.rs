//! Internal RTC (LSE) as the logger's calendar clock
//!
//! The peripheral lives in a global so both operating modes and any task can
//! reach it through the zero-sized [`RtcClock`] handle.

use core::cell::RefCell;
use critical_section::Mutex;
use defmt::info;
use embassy_stm32::rtc::{DateTime as RtcDateTime, DayOfWeek, Rtc};
use hal_abstractions::{Clock, ClockError, DateTime};

/// Global internal RTC instance
static RTC: Mutex<RefCell<Option<Rtc>>> = Mutex::new(RefCell::new(None));

/// Hand the RTC peripheral to the global
///
/// Must be called once during system initialization before any time operations.
pub fn initialize_rtc(rtc: Rtc) {
    critical_section::with(|cs| {
        RTC.borrow(cs).replace(Some(rtc));
    });
    info!("Internal RTC initialized");
}

/// Read a backup register; `None` before [`initialize_rtc`] or while the RTC
/// is borrowed
pub fn read_backup(register: usize) -> Option<u32> {
    critical_section::with(|cs| {
        let rtc = RTC.borrow(cs).try_borrow().ok()?;
        let value = rtc.as_ref()?.read_backup_register(register);
        value
    })
}

/// Write a backup register; these survive a system reset while VBAT holds
pub fn write_backup(register: usize, value: u32) {
    critical_section::with(|cs| {
        if let Ok(rtc) = RTC.borrow(cs).try_borrow() {
            if let Some(rtc) = rtc.as_ref() {
                rtc.write_backup_register(register, value);
            }
        }
    });
}

/// [`Clock`] backed by the global RTC
#[derive(Clone, Copy, Default)]
pub struct RtcClock;

impl Clock for RtcClock {
    fn now(&mut self) -> Result<DateTime, ClockError> {
        let now = critical_section::with(|cs| match RTC.borrow(cs).borrow_mut().as_mut() {
            Some(rtc) => rtc.now().map_err(|_| ClockError::HardwareError),
            None => Err(ClockError::NotInitialized),
        })?;

        // The calendar registers hold a two-digit year; anything else was never set
        let year = now
            .year()
            .checked_sub(2000)
            .filter(|y| *y <= 99)
            .ok_or(ClockError::NotInitialized)?;
        DateTime::new(
            year as u8,
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
        )
    }

    fn set(&mut self, datetime: &DateTime) -> Result<(), ClockError> {
        let full_year = datetime.full_year();
        let weekday = day_of_week(full_year, datetime.month(), datetime.day());
        let value = RtcDateTime::from(
            full_year,
            datetime.month(),
            datetime.day(),
            weekday,
            datetime.hour(),
            datetime.minute(),
            datetime.second(),
            0, // microsecond
        )
        .map_err(|_| ClockError::InvalidDateTime)?;

        critical_section::with(|cs| match RTC.borrow(cs).borrow_mut().as_mut() {
            Some(rtc) => rtc
                .set_datetime(value)
                .map_err(|_| ClockError::HardwareError),
            None => Err(ClockError::NotInitialized),
        })
    }
}

/// Weekday of a civil date; 1970-01-01 was a Thursday
fn day_of_week(year: u16, month: u8, day: u8) -> DayOfWeek {
    match (days_from_civil(year, month, day) + 3).rem_euclid(7) {
        0 => DayOfWeek::Monday,
        1 => DayOfWeek::Tuesday,
        2 => DayOfWeek::Wednesday,
        3 => DayOfWeek::Thursday,
        4 => DayOfWeek::Friday,
        5 => DayOfWeek::Saturday,
        _ => DayOfWeek::Sunday,
    }
}

/// Convert civil date (year, month, day) to days since Unix epoch
///
/// Howard Hinnant's days_from_civil algorithm.
/// Reference: http://howardhinnant.github.io/date_algorithms.html
fn days_from_civil(year: u16, month: u8, day: u8) -> i32 {
    let y = year as i32;
    let m = month as i32;
    let d = day as i32;

    // Adjust year and month to make March = month 0, February = month 11
    let (y, m) = if m <= 2 { (y - 1, m + 9) } else { (y, m - 3) };

    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32; // year of era [0, 399]
    let doy = (153 * (m as u32) + 2) / 5 + (d as u32) - 1; // day of year [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // day of era [0, 146096]

    era * 146097 + (doe as i32) - 719468 // 719468 = days from 0000-03-01 to 1970-01-01
}
