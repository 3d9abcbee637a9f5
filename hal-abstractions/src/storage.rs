//! Log storage interface
//!
//! A minimal file-system view of the removable log medium. Implementations
//! must preserve append ordering and report every failure distinctly from
//! success; they must not cache directory listings between calls.

use heapless::String;

/// Longest file name the storage layer and host protocol will carry
pub const MAX_NAME_LEN: usize = 64;

/// Bounded file name
pub type FileName = String<MAX_NAME_LEN>;

/// Storage operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Volume could not be mounted
    MountFailed,
    /// File does not exist
    NotFound,
    /// File name not representable on the medium
    InvalidName,
    /// Open/create failed
    OpenFailed,
    /// Read failed
    ReadFailed,
    /// Write/append failed
    WriteFailed,
    /// Flush/sync failed
    FlushFailed,
    /// Delete failed
    DeleteFailed,
    /// Medium is full
    Full,
    /// Any other low-level failure
    Io,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MountFailed => write!(f, "Mount failed"),
            Self::NotFound => write!(f, "File not found"),
            Self::InvalidName => write!(f, "Invalid file name"),
            Self::OpenFailed => write!(f, "Open failed"),
            Self::ReadFailed => write!(f, "Read failed"),
            Self::WriteFailed => write!(f, "Write failed"),
            Self::FlushFailed => write!(f, "Flush failed"),
            Self::DeleteFailed => write!(f, "Delete failed"),
            Self::Full => write!(f, "Storage full"),
            Self::Io => write!(f, "Storage I/O error"),
        }
    }
}

impl core::error::Error for StorageError {}

/// Directory entry as exposed to the host protocol
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileEntry {
    pub name: FileName,
    pub size: u32,
}

/// Volume capacity figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capacity {
    pub total_sectors: u32,
    pub free_sectors: u32,
    pub sector_size: u32,
}

/// File-system-like storage collaborator
///
/// File handles are owned by the caller and returned to `close`. Matching
/// by `extension` is case-insensitive and excludes the dot (`"log"`).
pub trait LogStorage {
    /// Open file handle
    type File;

    /// Mount the volume
    fn mount(&mut self) -> Result<(), StorageError>;

    /// Create (or truncate) a file for writing
    fn create(&mut self, name: &str) -> Result<Self::File, StorageError>;

    /// Open an existing file for reading
    fn open(&mut self, name: &str) -> Result<Self::File, StorageError>;

    /// Append `data` at the end of the file
    fn append(&mut self, file: &mut Self::File, data: &[u8]) -> Result<(), StorageError>;

    /// Read up to `buf.len()` bytes; `Ok(0)` at end of file
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Make buffered writes durable
    fn flush(&mut self, file: &mut Self::File) -> Result<(), StorageError>;

    /// Close the file
    fn close(&mut self, file: Self::File) -> Result<(), StorageError>;

    /// Size of an open file in bytes
    fn size(&self, file: &Self::File) -> u32;

    /// The `index`-th entry whose extension matches, in directory order
    fn entry(&mut self, extension: &str, index: usize) -> Result<Option<FileEntry>, StorageError>;

    /// Delete a file
    fn remove(&mut self, name: &str) -> Result<(), StorageError>;

    /// Volume capacity
    fn capacity(&mut self) -> Result<Capacity, StorageError>;
}
