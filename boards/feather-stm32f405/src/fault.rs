//! Hard faults carried across reset
//!
//! The fault handler cannot reach the log file, so it leaves a marker in an
//! RTC backup register and resets. The next boot turns the marker into
//! [`Fault::HardFault`], which the log session records and the LED shows.
#![allow(unsafe_code)]

use cortex_m_rt::{exception, ExceptionFrame};
use defmt::warn;
use energymeter_core::{ErrorStatus, Fault};

use crate::rtc;

const MARKER_REGISTER: usize = 0;

/// "HFLT"
const HARD_FAULT_MARKER: u32 = 0x4846_4C54;

#[exception]
unsafe fn HardFault(_frame: &ExceptionFrame) -> ! {
    rtc::write_backup(MARKER_REGISTER, HARD_FAULT_MARKER);
    cortex_m::peripheral::SCB::sys_reset()
}

/// Raise [`Fault::HardFault`] if the previous run ended in the fault handler
pub fn check_previous_run(errors: &ErrorStatus) {
    if rtc::read_backup(MARKER_REGISTER) == Some(HARD_FAULT_MARKER) {
        rtc::write_backup(MARKER_REGISTER, 0);
        warn!("previous run ended in a hard fault");
        errors.raise(Fault::HardFault);
    }
}
