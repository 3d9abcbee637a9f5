//! Acquisition-mode main loop
//!
//! [`DeviceState`] is the only state shared with interrupt context. The timer
//! interrupt drives a [`TickScheduler`](crate::tick::TickScheduler) against
//! `state.ticks`; the conversion-complete interrupt calls
//! [`DeviceState::on_conversion_complete`]. The main loop calls
//! [`Acquisition::poll`] continuously, which services pending work in a
//! fixed order and never waits:
//!
//! 1. calibrated sample ready → append REPORT
//! 2. BASE tick → start the next conversion
//! 3. JITTER tick → radio slot (no radio fitted)
//! 4. CYCLE tick → flush the log file
//! 5. new fault bits → append ERROR

use hal_abstractions::{AdcTrigger, LogStorage};

use crate::acquisition::{RawSample, SampleSlot};
use crate::config::CalibrationConfig;
use crate::error::ErrorStatus;
use crate::record::{Payload, Report};
use crate::session::LogSession;
use crate::tick::{TickEvent, TickFlags};

/// State shared between interrupt handlers and the main loop
pub struct DeviceState {
    pub ticks: TickFlags,
    pub samples: SampleSlot,
    pub errors: ErrorStatus,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub const fn new() -> Self {
        Self {
            ticks: TickFlags::new(),
            samples: SampleSlot::new(),
            errors: ErrorStatus::new(),
        }
    }

    /// Conversion-complete handler: calibrate and publish
    pub fn on_conversion_complete(&self, raw: &RawSample, config: &CalibrationConfig) {
        self.samples.publish(raw.calibrate(config));
    }
}

/// Work done by one [`Acquisition::poll`] pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollSummary {
    pub reported: bool,
    pub conversion_started: bool,
    pub jitter: bool,
    pub flushed: bool,
    pub faults_logged: bool,
}

impl PollSummary {
    pub fn idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Acquisition-mode engine
pub struct Acquisition<'a, S: LogStorage, A> {
    state: &'a DeviceState,
    session: LogSession<S>,
    adc: A,
    reported_errors: u8,
    calibration_warned: bool,
    temperature: Option<f32>,
}

impl<'a, S: LogStorage, A: AdcTrigger> Acquisition<'a, S, A> {
    /// Faults already set are assumed logged by [`LogSession::open`]
    pub fn new(state: &'a DeviceState, session: LogSession<S>, adc: A) -> Self {
        Self {
            state,
            session,
            adc,
            reported_errors: state.errors.bits(),
            calibration_warned: false,
            temperature: None,
        }
    }

    pub fn poll(&mut self, uptime_ms: u64) -> PollSummary {
        let mut summary = PollSummary::default();
        let state = self.state;
        let errors = &state.errors;

        if let Some(sample) = state.samples.take() {
            let report = match sample {
                Ok(sample) => {
                    // Not part of the record layout
                    if let Some(celsius) = sample.temperature {
                        trace!("die temperature {} C", celsius);
                    }
                    self.temperature = sample.temperature;
                    Report::from_sample(&sample)
                }
                Err(e) => {
                    if !self.calibration_warned {
                        warn!("calibration invalid: {}", e);
                        self.calibration_warned = true;
                    }
                    Report::INVALID
                }
            };
            trace!(
                "report {} {} {}",
                report.hv_voltage,
                report.hv_current,
                report.lv_voltage
            );
            let _ = self
                .session
                .append(uptime_ms, Payload::Report(report), errors);
            summary.reported = true;
        }

        if state.ticks.take(TickEvent::Base) {
            self.adc.start_conversion();
            summary.conversion_started = true;
        }

        if state.ticks.take(TickEvent::Jitter) {
            trace!("radio slot at {}", uptime_ms);
            summary.jitter = true;
        }

        if state.ticks.take(TickEvent::Cycle) {
            let _ = self.session.flush(errors);
            summary.flushed = true;
        }

        let bits = errors.bits();
        if bits & !self.reported_errors != 0 {
            let _ = self.session.append_errors(uptime_ms, errors);
            // Includes a storage bit raised by that append itself
            self.reported_errors = errors.bits();
            summary.faults_logged = true;
        }

        summary
    }

    /// Die temperature of the last good sample, when that channel is enabled
    pub fn die_temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn session(&self) -> &LogSession<S> {
        &self.session
    }

    pub fn into_parts(self) -> (LogSession<S>, A) {
        (self.session, self.adc)
    }
}
