//! Sticky fault bitmask
//!
//! Bits are set from interrupt or main-loop context and never cleared within
//! a boot session. Each set is a single atomic OR.

use core::sync::atomic::{AtomicU8, Ordering};

/// Independent fault flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Fault {
    /// Identity canary missing; running with the sentinel id
    InvalidIdentity = 1 << 0,
    /// Mount, open, append, or flush failed
    Storage = 1 << 1,
    /// Processor fault handler ran
    HardFault = 1 << 2,
}

impl Fault {
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// Sticky error status shared between interrupt and main-loop context
#[derive(Debug, Default)]
pub struct ErrorStatus {
    bits: AtomicU8,
}

impl ErrorStatus {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
        }
    }

    /// Set a fault; returns `true` if it was not already set
    pub fn raise(&self, fault: Fault) -> bool {
        let previous = self.bits.fetch_or(fault.bit(), Ordering::AcqRel);
        if previous & fault.bit() == 0 {
            warn!("fault raised: {}", fault);
            true
        } else {
            false
        }
    }

    pub fn is_set(&self, fault: Fault) -> bool {
        self.bits() & fault.bit() != 0
    }

    /// Raw bitmask as logged in ERROR records
    pub fn bits(&self) -> u8 {
        self.bits.load(Ordering::Acquire)
    }

    pub fn any(&self) -> bool {
        self.bits() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_are_sticky_and_independent() {
        let status = ErrorStatus::new();
        assert!(!status.any());

        assert!(status.raise(Fault::Storage));
        assert!(!status.raise(Fault::Storage));
        assert!(status.is_set(Fault::Storage));
        assert!(!status.is_set(Fault::InvalidIdentity));

        assert!(status.raise(Fault::InvalidIdentity));
        assert_eq!(status.bits(), 0b011);
    }
}
