//! ADC calibration against the internal reference
//!
//! The supply rail is not regulated tightly enough to serve as the ADC
//! reference, so every conversion includes the internal reference channel:
//!
//! ```text
//! supply  = full_scale * V_ref / raw_ref
//! channel = raw / full_scale * supply
//! temp    = (V_sense - V25) / slope + 25
//! ```
//!
//! Calibration runs in the conversion-complete interrupt and publishes into a
//! [`SampleSlot`]; the main loop takes it.

use core::cell::Cell;

use critical_section::Mutex;

use crate::config::CalibrationConfig;

/// Raw codes of one multi-channel conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSample {
    pub vref: u16,
    pub hv_voltage: u16,
    pub hv_current: u16,
    pub lv_voltage: u16,
    pub temperature: Option<u16>,
}

/// Calibrated sample in volts (current channel in sense volts)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub supply: f32,
    pub hv_voltage: f32,
    pub hv_current: f32,
    pub lv_voltage: f32,
    /// Die temperature in °C
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Reference channel read zero; the supply cannot be derived
    ZeroReference,
}

impl core::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ZeroReference => write!(f, "Reference channel read zero"),
        }
    }
}

impl core::error::Error for CalibrationError {}

impl RawSample {
    pub fn calibrate(&self, config: &CalibrationConfig) -> Result<Sample, CalibrationError> {
        if self.vref == 0 {
            return Err(CalibrationError::ZeroReference);
        }
        let full_scale = config.full_scale as f32;
        let supply = full_scale * config.vref_internal / self.vref as f32;
        let volts = |raw: u16| raw as f32 / full_scale * supply;

        let temperature = if config.temperature {
            self.temperature
                .map(|raw| (volts(raw) - config.temp_v25) / config.temp_slope + 25.0)
        } else {
            None
        };

        Ok(Sample {
            supply,
            hv_voltage: volts(self.hv_voltage),
            hv_current: volts(self.hv_current),
            lv_voltage: volts(self.lv_voltage),
            temperature,
        })
    }
}

/// Outcome of one conversion
pub type Calibrated = Result<Sample, CalibrationError>;

/// Single-slot mailbox from the conversion interrupt to the main loop
///
/// Publishing overwrites an unconsumed result.
pub struct SampleSlot {
    slot: Mutex<Cell<Option<Calibrated>>>,
}

impl Default for SampleSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSlot {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    pub fn publish(&self, sample: Calibrated) {
        critical_section::with(|cs| self.slot.borrow(cs).set(Some(sample)));
    }

    pub fn take(&self) -> Option<Calibrated> {
        critical_section::with(|cs| self.slot.borrow(cs).take())
    }

    pub fn is_ready(&self) -> bool {
        critical_section::with(|cs| self.slot.borrow(cs).get().is_some())
    }
}
