//! Per-boot log file
//!
//! One file per acquisition session, named after the device id and the boot
//! time. Appends are best effort: a failure raises [`Fault::Storage`] and the
//! record is dropped. A file that could not be opened at all is retried only
//! from [`LogSession::flush`], once per cycle, since each attempt against a
//! missing card costs a full card-init timeout.

use core::fmt::Write;

use hal_abstractions::{DateTime, FileName, LogStorage, StorageError};

use crate::config::LOG_EXTENSION;
use crate::error::{ErrorStatus, Fault};
use crate::record::{LogRecord, Payload};
use crate::time;

/// Open log session
pub struct LogSession<S: LogStorage> {
    storage: S,
    file: Option<S::File>,
    name: FileName,
    device_id: u16,
    boot_offset_ms: u32,
    written: u32,
}

/// `"<5-digit id> <YYYY-MM-DD-HH-mm-ss>.log"`
pub fn file_name(device_id: u16, boot: &DateTime) -> FileName {
    let mut name = FileName::new();
    // 5 + 1 + 19 + 4 bytes, well under the name limit
    let _ = write!(
        name,
        "{:05} {}.{}",
        device_id,
        time::format_long(boot),
        LOG_EXTENSION
    );
    name
}

impl<S: LogStorage> LogSession<S> {
    /// Mount, create the session file, and write the opening records
    ///
    /// Never fails: storage problems are recorded in `errors` and retried on
    /// the next flush.
    pub fn open(
        mut storage: S,
        device_id: u16,
        boot: &DateTime,
        uptime_ms: u64,
        errors: &ErrorStatus,
    ) -> Self {
        let name = file_name(device_id, boot);
        let file = match storage.mount().and_then(|()| storage.create(&name)) {
            Ok(file) => Some(file),
            Err(e) => {
                error!("cannot open log file: {}", e);
                errors.raise(Fault::Storage);
                None
            }
        };
        info!("log session {} (id {})", name.as_str(), device_id);

        let mut session = Self {
            storage,
            file,
            name,
            device_id,
            boot_offset_ms: time::month_offset_ms(boot),
            written: 0,
        };

        let _ = session.append(uptime_ms, Payload::event(b"BOOT"), errors);
        if errors.any() {
            let _ = session.append_errors(uptime_ms, errors);
        }
        session
    }

    /// Stamp and append one record
    pub fn append(
        &mut self,
        uptime_ms: u64,
        payload: Payload,
        errors: &ErrorStatus,
    ) -> Result<(), StorageError> {
        let record = LogRecord::new(self.timestamp(uptime_ms), payload, self.device_id);
        let result = self.write(&record.to_bytes());
        match result {
            Ok(()) => self.written += 1,
            Err(e) => {
                if errors.raise(Fault::Storage) {
                    error!("log append failed: {}", e);
                }
            }
        }
        result
    }

    /// Append an ERROR record carrying the current fault mask
    pub fn append_errors(&mut self, uptime_ms: u64, errors: &ErrorStatus) -> Result<(), StorageError> {
        let payload = Payload::Error {
            time: self.timestamp(uptime_ms),
            status: errors.bits(),
        };
        self.append(uptime_ms, payload, errors)
    }

    /// Make appended records durable
    ///
    /// Re-creates the session file first if it was never opened.
    pub fn flush(&mut self, errors: &ErrorStatus) -> Result<(), StorageError> {
        let result = self.reopen().and_then(|()| match self.file.as_mut() {
            Some(file) => self.storage.flush(file),
            None => Err(StorageError::OpenFailed),
        });
        if let Err(e) = result {
            if errors.raise(Fault::Storage) {
                error!("log flush failed: {}", e);
            }
        }
        result
    }

    fn reopen(&mut self) -> Result<(), StorageError> {
        if self.file.is_none() {
            self.storage.mount()?;
            self.file = Some(self.storage.create(&self.name)?);
            info!("log file {} opened late", self.name.as_str());
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        match self.file.as_mut() {
            Some(file) => self.storage.append(file, bytes),
            None => Err(StorageError::OpenFailed),
        }
    }

    pub fn timestamp(&self, uptime_ms: u64) -> u32 {
        time::timestamp(self.boot_offset_ms, uptime_ms)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    /// Records successfully appended this session
    pub fn written(&self) -> u32 {
        self.written
    }

    /// Close the file and hand the storage back
    pub fn close(mut self) -> Result<S, StorageError> {
        if let Some(file) = self.file.take() {
            self.storage.close(file)?;
        }
        Ok(self.storage)
    }
}
