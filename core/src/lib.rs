//! Platform-agnostic core logic for the energy meter data logger
//!
//! This crate contains the acquisition and logging engine shared by every
//! board. It has NO hardware dependencies: peripherals are reached through
//! the traits in `hal-abstractions`.
//!
//! - **`checksum`**: 16-bit record integrity code
//! - **`record`**: fixed-size binary log records
//! - **`identity`**: canary-guarded device id in flash
//! - **`tick`**: timer-interrupt driven base/jitter/cycle events
//! - **`acquisition`**: ratiometric ADC calibration
//! - **`session`**: per-boot log file
//! - **`fat_name`**: 8.3 storage names for session files
//! - **`engine`**: acquisition-mode main loop
//! - **`protocol`**: host command/response handler

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod fmt;

pub mod acquisition;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod fat_name;
pub mod identity;
pub mod protocol;
pub mod record;
pub mod session;
pub mod tick;
pub mod time;

pub use acquisition::{CalibrationError, RawSample, Sample, SampleSlot};
pub use engine::{Acquisition, DeviceState, PollSummary};
pub use error::{ErrorStatus, Fault};
pub use identity::{DeviceIdentity, IdentityError, IdentityStore};
pub use protocol::{Command, HostProtocol, ParseError};
pub use record::{LogRecord, Payload, RecordType, RemoteCommand, RemotePayload, Report};
pub use session::LogSession;
pub use tick::{TickEvent, TickFlags, TickScheduler, XorShift32};
