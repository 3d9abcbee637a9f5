//! Identity sector on the internal flash
//!
//! The STM32F405RG has 1 MiB of flash in twelve sectors; the last one
//! (128 KiB at `0x080E_0000`) is reserved for the device identity and is far
//! beyond the end of the firmware image. embassy unlocks the controller around
//! each blocking operation, so the program/erase window here is a software
//! gate that refuses writes outside `unlock()`/`lock()`.

use defmt::warn;
use embassy_stm32::flash::{Blocking, Flash, FLASH_BASE};
use hal_abstractions::{FlashError, NvMemory};

/// First byte of the identity sector
pub const IDENTITY_SECTOR: u32 = 0x080E_0000;

/// Sector 11 size
const IDENTITY_SECTOR_SIZE: u32 = 128 * 1024;

pub struct IdentityFlash {
    flash: Flash<'static, Blocking>,
    unlocked: bool,
}

impl IdentityFlash {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self {
            flash,
            unlocked: false,
        }
    }

    /// Offset from the start of flash, if `[address, address + len)` is inside the sector
    fn offset(address: u32, len: u32) -> Result<u32, FlashError> {
        let end = address.checked_add(len).ok_or(FlashError::InvalidAddress)?;
        if address < IDENTITY_SECTOR || end > IDENTITY_SECTOR + IDENTITY_SECTOR_SIZE {
            return Err(FlashError::InvalidAddress);
        }
        Ok(address - FLASH_BASE as u32)
    }
}

impl NvMemory for IdentityFlash {
    fn unlock(&mut self) -> Result<(), FlashError> {
        self.unlocked = true;
        Ok(())
    }

    fn lock(&mut self) {
        self.unlocked = false;
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let offset = Self::offset(address, buf.len() as u32)?;
        self.flash
            .blocking_read(offset, buf)
            .map_err(|_| FlashError::ReadFailed)
    }

    fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if !self.unlocked {
            return Err(FlashError::Locked);
        }
        Self::offset(address, 1)?;
        let from = Self::offset(IDENTITY_SECTOR, IDENTITY_SECTOR_SIZE)?;
        self.flash
            .blocking_erase(from, from + IDENTITY_SECTOR_SIZE)
            .map_err(|e| {
                warn!("identity sector erase failed: {:?}", e);
                FlashError::EraseFailed
            })
    }

    fn program_word(&mut self, address: u32, word: u32) -> Result<(), FlashError> {
        if !self.unlocked {
            return Err(FlashError::Locked);
        }
        if address % 4 != 0 {
            return Err(FlashError::InvalidAddress);
        }
        let offset = Self::offset(address, 4)?;
        self.flash
            .blocking_write(offset, &word.to_le_bytes())
            .map_err(|e| {
                warn!("identity word program failed: {:?}", e);
                FlashError::ProgramFailed
            })
    }
}
