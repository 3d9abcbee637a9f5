//! Non-volatile memory interface
//!
//! # Flash Characteristics
//!
//! - Erase sets every byte of a page to `0xFF`
//! - Programming can only clear bits (1→0); a word is written once per erase cycle
//! - Programming is word-aligned (32-bit)
//! - The controller is locked outside an explicit unlock/lock window

/// Flash operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Controller refused the unlock sequence
    Locked,
    /// Address outside the writable region or not aligned
    InvalidAddress,
    /// Page erase failed
    EraseFailed,
    /// Word programming failed (or target word was not erased)
    ProgramFailed,
    /// Read failed
    ReadFailed,
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Locked => write!(f, "Flash controller locked"),
            Self::InvalidAddress => write!(f, "Invalid flash address"),
            Self::EraseFailed => write!(f, "Flash erase failed"),
            Self::ProgramFailed => write!(f, "Flash program failed"),
            Self::ReadFailed => write!(f, "Flash read failed"),
        }
    }
}

impl core::error::Error for FlashError {}

/// Page-erasable, word-programmable memory
///
/// Implementations must validate addresses; callers never dereference raw
/// flash pointers.
pub trait NvMemory {
    /// Open the program/erase window
    fn unlock(&mut self) -> Result<(), FlashError>;

    /// Close the program/erase window
    ///
    /// Must be safe to call after any failed step, and more than once.
    fn lock(&mut self);

    /// Read `buf.len()` bytes starting at `address`
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Erase the page containing `address`
    fn erase_page(&mut self, address: u32) -> Result<(), FlashError>;

    /// Program one little-endian word at a word-aligned `address`
    fn program_word(&mut self, address: u32, word: u32) -> Result<(), FlashError>;
}
