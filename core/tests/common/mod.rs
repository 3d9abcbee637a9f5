//! In-memory collaborators for end-to-end tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use embedded_io_async::{ErrorKind, ErrorType, Write};
use hal_abstractions::{
    Capacity, Clock, ClockError, DateTime, FileEntry, FileName, FlashError, LogStorage,
    NvMemory, StorageError,
};

pub const IDENTITY_PAGE: u32 = 0x080E_0000;
const PAGE_SIZE: usize = 16;

/// Flash page shared between store instances, so a fresh store can stand in
/// for a power cycle
#[derive(Clone)]
pub struct MemFlash {
    page: Rc<RefCell<[u8; PAGE_SIZE]>>,
    unlocked: Rc<Cell<bool>>,
    failing: Rc<Cell<bool>>,
}

impl MemFlash {
    pub fn erased() -> Self {
        Self {
            page: Rc::new(RefCell::new([0xFF; PAGE_SIZE])),
            unlocked: Rc::new(Cell::new(false)),
            failing: Rc::new(Cell::new(false)),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.get()
    }

    /// Make every erase and program fail, as a worn or protected sector would
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    fn offset(address: u32, len: usize) -> Result<usize, FlashError> {
        let offset = address
            .checked_sub(IDENTITY_PAGE)
            .ok_or(FlashError::InvalidAddress)? as usize;
        if offset + len > PAGE_SIZE {
            return Err(FlashError::InvalidAddress);
        }
        Ok(offset)
    }
}

impl NvMemory for MemFlash {
    fn unlock(&mut self) -> Result<(), FlashError> {
        self.unlocked.set(true);
        Ok(())
    }

    fn lock(&mut self) {
        self.unlocked.set(false);
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let offset = Self::offset(address, buf.len())?;
        buf.copy_from_slice(&self.page.borrow()[offset..offset + buf.len()]);
        Ok(())
    }

    fn erase_page(&mut self, _address: u32) -> Result<(), FlashError> {
        if !self.unlocked.get() {
            return Err(FlashError::Locked);
        }
        if self.failing.get() {
            return Err(FlashError::EraseFailed);
        }
        self.page.borrow_mut().fill(0xFF);
        Ok(())
    }

    fn program_word(&mut self, address: u32, word: u32) -> Result<(), FlashError> {
        if !self.unlocked.get() {
            return Err(FlashError::Locked);
        }
        if address % 4 != 0 {
            return Err(FlashError::InvalidAddress);
        }
        if self.failing.get() {
            return Err(FlashError::ProgramFailed);
        }
        let offset = Self::offset(address, 4)?;
        let mut page = self.page.borrow_mut();
        for (cell, byte) in page[offset..offset + 4].iter_mut().zip(word.to_le_bytes()) {
            *cell &= byte;
        }
        Ok(())
    }
}

pub struct MemFile {
    name: String,
    position: usize,
}

/// Flat directory of named byte vectors
#[derive(Default)]
pub struct MemStorage {
    files: Vec<(String, Vec<u8>)>,
    pub fail_read_at: Option<usize>,
    pub flushes: usize,
}

impl MemStorage {
    pub const SECTOR_SIZE: u32 = 512;
    pub const TOTAL_SECTORS: u32 = 2048;

    pub fn with_file(mut self, name: &str, contents: &[u8]) -> Self {
        self.files.push((name.into(), contents.to_vec()));
        self
    }

    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn names(&self) -> Vec<&str> {
        self.files.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn find(&mut self, name: &str) -> Result<&mut Vec<u8>, StorageError> {
        self.files
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data)
            .ok_or(StorageError::NotFound)
    }
}

impl LogStorage for MemStorage {
    type File = MemFile;

    fn mount(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn create(&mut self, name: &str) -> Result<MemFile, StorageError> {
        match self.find(name) {
            Ok(data) => data.clear(),
            Err(_) => self.files.push((name.into(), Vec::new())),
        }
        Ok(MemFile {
            name: name.into(),
            position: 0,
        })
    }

    fn open(&mut self, name: &str) -> Result<MemFile, StorageError> {
        self.find(name)?;
        Ok(MemFile {
            name: name.into(),
            position: 0,
        })
    }

    fn append(&mut self, file: &mut MemFile, data: &[u8]) -> Result<(), StorageError> {
        self.find(&file.name)?.extend_from_slice(data);
        Ok(())
    }

    fn read(&mut self, file: &mut MemFile, buf: &mut [u8]) -> Result<usize, StorageError> {
        if let Some(limit) = self.fail_read_at {
            if file.position >= limit {
                return Err(StorageError::ReadFailed);
            }
        }
        let position = file.position;
        let data = self.find(&file.name)?;
        let n = buf.len().min(data.len().saturating_sub(position));
        buf[..n].copy_from_slice(&data[position..position + n]);
        file.position += n;
        Ok(n)
    }

    fn flush(&mut self, _file: &mut MemFile) -> Result<(), StorageError> {
        self.flushes += 1;
        Ok(())
    }

    fn close(&mut self, _file: MemFile) -> Result<(), StorageError> {
        Ok(())
    }

    fn size(&self, file: &MemFile) -> u32 {
        self.contents(&file.name).map_or(0, |data| data.len() as u32)
    }

    fn entry(&mut self, extension: &str, index: usize) -> Result<Option<FileEntry>, StorageError> {
        let suffix = format!(".{}", extension.to_ascii_lowercase());
        let found = self
            .files
            .iter()
            .filter(|(name, _)| name.to_ascii_lowercase().ends_with(&suffix))
            .nth(index);
        match found {
            Some((name, data)) => Ok(Some(FileEntry {
                name: FileName::try_from(name.as_str()).map_err(|_| StorageError::InvalidName)?,
                size: data.len() as u32,
            })),
            None => Ok(None),
        }
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        let index = self
            .files
            .iter()
            .position(|(n, _)| n == name)
            .ok_or(StorageError::NotFound)?;
        self.files.remove(index);
        Ok(())
    }

    fn capacity(&mut self) -> Result<Capacity, StorageError> {
        let used: u32 = self
            .files
            .iter()
            .map(|(_, data)| (data.len() as u32).div_ceil(Self::SECTOR_SIZE))
            .sum();
        Ok(Capacity {
            total_sectors: Self::TOTAL_SECTORS,
            free_sectors: Self::TOTAL_SECTORS - used,
            sector_size: Self::SECTOR_SIZE,
        })
    }
}

#[derive(Default)]
pub struct FakeClock {
    pub now: Option<DateTime>,
}

impl Clock for FakeClock {
    fn now(&mut self) -> Result<DateTime, ClockError> {
        self.now.ok_or(ClockError::NotInitialized)
    }

    fn set(&mut self, datetime: &DateTime) -> Result<(), ClockError> {
        self.now = Some(*datetime);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

impl core::fmt::Display for ChannelClosed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "channel closed")
    }
}

impl core::error::Error for ChannelClosed {}

impl embedded_io_async::Error for ChannelClosed {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Host side of the channel: records every byte written
#[derive(Default)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub writes: Vec<usize>,
    pub limit: Option<usize>,
}

impl Capture {
    pub fn take(&mut self) -> Vec<u8> {
        self.writes.clear();
        std::mem::take(&mut self.bytes)
    }
}

impl ErrorType for Capture {
    type Error = ChannelClosed;
}

impl Write for Capture {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelClosed> {
        let room = match self.limit {
            Some(limit) => limit.saturating_sub(self.bytes.len()),
            None => buf.len(),
        };
        if room == 0 && !buf.is_empty() {
            return Err(ChannelClosed);
        }
        let n = buf.len().min(room);
        self.bytes.extend_from_slice(&buf[..n]);
        self.writes.push(n);
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), ChannelClosed> {
        Ok(())
    }
}
