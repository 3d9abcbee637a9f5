//! Firmware constants and tunable configuration

/// Canary word marking an initialized identity page
pub const FLASH_CANARY_DEVICE_ID: u32 = 0xEE11_AD00;

/// Sentinel id used when the identity page is not initialized
pub const DEVICE_ID_INVALID: u16 = 0xFFFF;

/// Reserved id addressing every device
pub const DEVICE_ID_BROADCAST: u16 = 0xFFFE;

/// Sentinel byte terminating every log record
pub const RECORD_END_MARKER: u8 = 0xA5;

/// Extension of log files on the storage medium (without the dot)
pub const LOG_EXTENSION: &str = "log";

/// Largest host command message accepted
pub const MAX_MESSAGE_LEN: usize = 96;

/// Bulk transfer chunk (USB full-speed bulk packet size)
pub const TRANSFER_CHUNK: usize = 64;

/// Tick scheduler configuration
///
/// All values count base ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickConfig {
    /// Base tick period in milliseconds
    pub base_period_ms: u32,
    /// Base ticks per cycle; the cycle tick flushes the log
    pub cycle_len: u16,
    /// Earliest position of the jitter tick within a cycle
    pub jitter_offset: u16,
    /// Width of the jitter window
    pub jitter_range: u16,
    /// Fault indicator toggle divider while any fault is set
    pub blink_fast: u16,
    /// Fault indicator toggle divider otherwise
    pub blink_slow: u16,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            base_period_ms: 20,
            cycle_len: 48, // ≈ 960 ms
            jitter_offset: 4,
            jitter_range: 40,
            blink_fast: 5,  // 100 ms
            blink_slow: 25, // 500 ms
        }
    }
}

/// Tick configuration rejected by [`TickConfig::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickConfigError {
    /// Period or cycle of zero
    ZeroPeriod,
    /// Jitter window empty, starting at 0, or extending past the cycle
    JitterWindow,
    /// Blink divider of zero
    ZeroBlink,
}

impl TickConfig {
    pub fn validate(&self) -> Result<(), TickConfigError> {
        if self.base_period_ms == 0 || self.cycle_len == 0 {
            return Err(TickConfigError::ZeroPeriod);
        }
        // Counter runs 1..=cycle_len, so the window must sit inside that range
        let window_end = self.jitter_offset as u32 + self.jitter_range as u32;
        if self.jitter_offset == 0 || self.jitter_range == 0 || window_end > self.cycle_len as u32 + 1
        {
            return Err(TickConfigError::JitterWindow);
        }
        if self.blink_fast == 0 || self.blink_slow == 0 {
            return Err(TickConfigError::ZeroBlink);
        }
        Ok(())
    }

    /// Cycle length in milliseconds
    pub fn cycle_ms(&self) -> u32 {
        self.base_period_ms * self.cycle_len as u32
    }
}

/// ADC calibration constants
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationConfig {
    /// Full-scale ADC code (2^bits - 1)
    pub full_scale: u16,
    /// Internal reference voltage in volts
    pub vref_internal: f32,
    /// Temperature sensor voltage at 25 °C in volts
    pub temp_v25: f32,
    /// Temperature sensor slope in volts per °C
    pub temp_slope: f32,
    /// Convert the temperature channel
    pub temperature: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        // STM32F405 datasheet: VREFINT 1.21 V typ, V25 0.76 V, 2.5 mV/°C
        Self {
            full_scale: 4095,
            vref_internal: 1.21,
            temp_v25: 0.76,
            temp_slope: 0.0025,
            temperature: false,
        }
    }
}
