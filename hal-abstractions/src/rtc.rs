//! Real-time clock interface
//!
//! The logger's clock keeps a two-digit year (`0..=99` meaning 2000-2099),
//! which is also what the host protocol exchanges.

/// RTC operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// RTC not initialized
    NotInitialized,
    /// RTC hardware error
    HardwareError,
    /// Field out of range
    InvalidDateTime,
}

impl core::fmt::Display for ClockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "RTC not initialized"),
            Self::HardwareError => write!(f, "RTC hardware error"),
            Self::InvalidDateTime => write!(f, "Invalid date/time"),
        }
    }
}

impl core::error::Error for ClockError {}

/// Calendar date-time with 1-second resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    year: u8,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl DateTime {
    /// 2000-01-01 00:00:00
    pub const EPOCH: Self = Self {
        year: 0,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Build a validated date-time; `year` is years since 2000
    pub fn new(
        year: u8,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, ClockError> {
        if year > 99
            || !(1..=12).contains(&month)
            || day == 0
            || day > days_in_month(year, month)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(ClockError::InvalidDateTime);
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Two-digit year (years since 2000)
    pub fn year(&self) -> u8 {
        self.year
    }

    /// Full Gregorian year
    pub fn full_year(&self) -> u16 {
        2000 + self.year as u16
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }
}

/// Check if a two-digit year (2000-2099) is a leap year
///
/// 2000 is divisible by 400, so within this range every multiple of 4 is leap.
pub fn is_leap_year(year: u8) -> bool {
    year % 4 == 0
}

/// Number of days in `month` (1-12) of the given two-digit year
pub fn days_in_month(year: u8, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

/// Calendar clock collaborator
pub trait Clock {
    /// Read the current date-time
    fn now(&mut self) -> Result<DateTime, ClockError>;

    /// Set the current date-time
    fn set(&mut self, datetime: &DateTime) -> Result<(), ClockError>;
}
