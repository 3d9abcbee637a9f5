//! Hardware abstraction traits for the energy meter firmware
//!
//! This crate defines the collaborator boundary between the platform-agnostic
//! logging engine and the board support crate. The BSP implements these traits
//! on top of its flash controller, RTC, and SD card; tests implement them in
//! memory.
//!
//! - **`adc`**: start of a multi-channel conversion
//! - **`flash`**: word-programmable, page-erasable non-volatile memory
//! - **`rtc`**: calendar clock with a two-digit year
//! - **`storage`**: file-system-like log storage

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod adc;
pub mod flash;
pub mod rtc;
pub mod storage;

pub use adc::AdcTrigger;
pub use flash::{FlashError, NvMemory};
pub use rtc::{Clock, ClockError, DateTime};
pub use storage::{Capacity, FileEntry, FileName, LogStorage, StorageError, MAX_NAME_LEN};
