//! Device identity persisted in a dedicated flash page
//!
//! The page holds two little-endian words: the canary
//! [`FLASH_CANARY_DEVICE_ID`] followed by the id widened to 32 bits. A page
//! without the canary (fresh or partially written) is uninitialized and the
//! device runs as [`DEVICE_ID_INVALID`].

use hal_abstractions::{FlashError, NvMemory};

use crate::config::{DEVICE_ID_BROADCAST, DEVICE_ID_INVALID, FLASH_CANARY_DEVICE_ID};
use crate::error::{ErrorStatus, Fault};

/// Identity store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdentityError {
    /// Underlying flash operation failed
    Flash(FlashError),
    /// Canary word missing; the page was never written
    InvalidCanary,
    /// Stored id does not fit 16 bits
    Corrupt,
    /// Id is one of the reserved sentinels
    ReservedId,
    /// Read-back after programming did not match
    VerifyFailed,
}

impl core::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Flash(e) => write!(f, "Flash error: {}", e),
            Self::InvalidCanary => write!(f, "Identity page not initialized"),
            Self::Corrupt => write!(f, "Stored identity corrupt"),
            Self::ReservedId => write!(f, "Reserved device id"),
            Self::VerifyFailed => write!(f, "Identity verify failed"),
        }
    }
}

impl core::error::Error for IdentityError {}

impl From<FlashError> for IdentityError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

/// Raw contents of the identity page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    pub canary: u32,
    pub id: u32,
}

impl DeviceIdentity {
    pub fn is_initialized(&self) -> bool {
        self.canary == FLASH_CANARY_DEVICE_ID
    }

    pub fn device_id(&self) -> Result<u16, IdentityError> {
        if !self.is_initialized() {
            return Err(IdentityError::InvalidCanary);
        }
        u16::try_from(self.id).map_err(|_| IdentityError::Corrupt)
    }
}

/// Identity page accessor
pub struct IdentityStore<F> {
    flash: F,
    page_address: u32,
}

impl<F: NvMemory> IdentityStore<F> {
    pub fn new(flash: F, page_address: u32) -> Self {
        Self {
            flash,
            page_address,
        }
    }

    pub fn read_raw(&mut self) -> Result<DeviceIdentity, IdentityError> {
        let mut buf = [0u8; 8];
        self.flash.read(self.page_address, &mut buf)?;
        Ok(DeviceIdentity {
            canary: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            id: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Stored id, or an error if the page is not initialized
    pub fn read(&mut self) -> Result<u16, IdentityError> {
        self.read_raw()?.device_id()
    }

    /// Stored id, falling back to [`DEVICE_ID_INVALID`]
    ///
    /// Any failure raises [`Fault::InvalidIdentity`].
    pub fn resolve(&mut self, errors: &ErrorStatus) -> u16 {
        match self.read() {
            Ok(id) => id,
            Err(e) => {
                warn!("device identity unavailable: {}", e);
                errors.raise(Fault::InvalidIdentity);
                DEVICE_ID_INVALID
            }
        }
    }

    /// Erase the page and program canary then id
    ///
    /// The controller is locked again on every path.
    pub fn write(&mut self, new_id: u16) -> Result<(), IdentityError> {
        if new_id == DEVICE_ID_INVALID || new_id == DEVICE_ID_BROADCAST {
            return Err(IdentityError::ReservedId);
        }

        self.flash.unlock()?;
        let result = self.program(new_id);
        self.flash.lock();
        result?;

        match self.read() {
            Ok(id) if id == new_id => {
                info!("device id set to {}", new_id);
                Ok(())
            }
            _ => Err(IdentityError::VerifyFailed),
        }
    }

    fn program(&mut self, new_id: u16) -> Result<(), IdentityError> {
        self.flash.erase_page(self.page_address)?;
        self.flash
            .program_word(self.page_address, FLASH_CANARY_DEVICE_ID)?;
        self.flash
            .program_word(self.page_address + 4, new_id as u32)?;
        Ok(())
    }

    pub fn release(self) -> F {
        self.flash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u32 = 0x0800_0000;

    struct MockFlash {
        words: [u32; 2],
        unlocked: bool,
        lock_calls: usize,
        fail_erase: bool,
        fail_program_at: Option<u32>,
    }

    impl MockFlash {
        fn erased() -> Self {
            Self {
                words: [0xFFFF_FFFF; 2],
                unlocked: false,
                lock_calls: 0,
                fail_erase: false,
                fail_program_at: None,
            }
        }

        fn index(address: u32) -> Result<usize, FlashError> {
            match address.checked_sub(PAGE) {
                Some(offset) if offset % 4 == 0 && offset < 8 => Ok((offset / 4) as usize),
                _ => Err(FlashError::InvalidAddress),
            }
        }
    }

    impl NvMemory for MockFlash {
        fn unlock(&mut self) -> Result<(), FlashError> {
            self.unlocked = true;
            Ok(())
        }

        fn lock(&mut self) {
            self.unlocked = false;
            self.lock_calls += 1;
        }

        fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
            let start = Self::index(address)?;
            let mut bytes = [0u8; 8];
            bytes[0..4].copy_from_slice(&self.words[0].to_le_bytes());
            bytes[4..8].copy_from_slice(&self.words[1].to_le_bytes());
            let from = start * 4;
            let to = from + buf.len();
            if to > bytes.len() {
                return Err(FlashError::ReadFailed);
            }
            buf.copy_from_slice(&bytes[from..to]);
            Ok(())
        }

        fn erase_page(&mut self, _address: u32) -> Result<(), FlashError> {
            if !self.unlocked {
                return Err(FlashError::Locked);
            }
            if self.fail_erase {
                return Err(FlashError::EraseFailed);
            }
            self.words = [0xFFFF_FFFF; 2];
            Ok(())
        }

        fn program_word(&mut self, address: u32, word: u32) -> Result<(), FlashError> {
            if !self.unlocked {
                return Err(FlashError::Locked);
            }
            if self.fail_program_at == Some(address) {
                return Err(FlashError::ProgramFailed);
            }
            let i = Self::index(address)?;
            self.words[i] &= word;
            Ok(())
        }
    }

    #[test]
    fn test_erased_page_resolves_to_invalid() {
        let mut store = IdentityStore::new(MockFlash::erased(), PAGE);
        let errors = ErrorStatus::new();

        assert_eq!(store.read(), Err(IdentityError::InvalidCanary));
        assert_eq!(store.resolve(&errors), DEVICE_ID_INVALID);
        assert!(errors.is_set(Fault::InvalidIdentity));
    }

    #[test]
    fn test_write_then_read() {
        let mut store = IdentityStore::new(MockFlash::erased(), PAGE);
        store.write(1234).unwrap();

        let errors = ErrorStatus::new();
        assert_eq!(store.resolve(&errors), 1234);
        assert!(!errors.any());

        let raw = store.read_raw().unwrap();
        assert_eq!(raw.canary, FLASH_CANARY_DEVICE_ID);
        assert_eq!(raw.id, 1234);

        let flash = store.release();
        assert!(!flash.unlocked);
    }

    #[test]
    fn test_rewrite_replaces_previous_id() {
        let mut store = IdentityStore::new(MockFlash::erased(), PAGE);
        store.write(0x0F0F).unwrap();
        store.write(0x00F0).unwrap();
        assert_eq!(store.read(), Ok(0x00F0));
    }

    #[test]
    fn test_reserved_ids_rejected() {
        let mut store = IdentityStore::new(MockFlash::erased(), PAGE);
        assert_eq!(store.write(DEVICE_ID_INVALID), Err(IdentityError::ReservedId));
        assert_eq!(
            store.write(DEVICE_ID_BROADCAST),
            Err(IdentityError::ReservedId)
        );
        assert_eq!(store.release().lock_calls, 0);
    }

    #[test]
    fn test_lock_restored_after_erase_failure() {
        let mut flash = MockFlash::erased();
        flash.fail_erase = true;
        let mut store = IdentityStore::new(flash, PAGE);

        assert_eq!(
            store.write(7),
            Err(IdentityError::Flash(FlashError::EraseFailed))
        );
        let flash = store.release();
        assert!(!flash.unlocked);
        assert_eq!(flash.lock_calls, 1);
    }

    #[test]
    fn test_interrupted_write_leaves_page_uninitialized() {
        let mut flash = MockFlash::erased();
        flash.fail_program_at = Some(PAGE);
        let mut store = IdentityStore::new(flash, PAGE);

        assert!(store.write(7).is_err());
        assert_eq!(store.read(), Err(IdentityError::InvalidCanary));
        assert!(!store.release().unlocked);
    }

    #[test]
    fn test_oversized_stored_id_is_corrupt() {
        let mut flash = MockFlash::erased();
        flash.words = [FLASH_CANARY_DEVICE_ID, 0x0001_0000];
        let mut store = IdentityStore::new(flash, PAGE);
        assert_eq!(store.read(), Err(IdentityError::Corrupt));
    }
}
