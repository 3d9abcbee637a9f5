//! Host command dispatcher

use embassy_futures::join::join;
use embedded_io_async::Write;
use hal_abstractions::{Clock, ClockError, LogStorage, NvMemory, StorageError};

use super::command::{Command, ParseError};
use super::response::{self, Overflow};
use crate::config::{DEVICE_ID_INVALID, LOG_EXTENSION, TRANSFER_CHUNK};
use crate::identity::{IdentityError, IdentityStore};

/// Any failure answered with `$ERROR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    Parse(ParseError),
    Storage(StorageError),
    Identity(IdentityError),
    Clock(ClockError),
    /// Response header too long for the line buffer
    Overflow,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::Identity(e) => write!(f, "Identity error: {}", e),
            Self::Clock(e) => write!(f, "Clock error: {}", e),
            Self::Overflow => write!(f, "Response overflow"),
        }
    }
}

impl core::error::Error for ProtocolError {}

impl From<ParseError> for ProtocolError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<StorageError> for ProtocolError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<IdentityError> for ProtocolError {
    fn from(e: IdentityError) -> Self {
        Self::Identity(e)
    }
}

impl From<ClockError> for ProtocolError {
    fn from(e: ClockError) -> Self {
        Self::Clock(e)
    }
}

impl From<Overflow> for ProtocolError {
    fn from(_: Overflow) -> Self {
        Self::Overflow
    }
}

/// Command failure: answerable, or the channel itself failed
enum HandlerError<E> {
    Protocol(ProtocolError),
    Channel(E),
}

macro_rules! answerable {
    ($($source:ty),* $(,)?) => {$(
        impl<E> From<$source> for HandlerError<E> {
            fn from(e: $source) -> Self {
                Self::Protocol(e.into())
            }
        }
    )*};
}

answerable!(
    ProtocolError,
    ParseError,
    StorageError,
    IdentityError,
    ClockError,
    Overflow,
);

async fn send<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), HandlerError<W::Error>> {
    out.write_all(bytes).await.map_err(HandlerError::Channel)
}

/// Read the next chunk; end of file before `buf` is filled at all is an error
fn read_chunk<S: LogStorage>(
    storage: &mut S,
    file: &mut S::File,
    buf: &mut [u8],
) -> Result<usize, StorageError> {
    if buf.is_empty() {
        return Ok(0);
    }
    match storage.read(file, buf)? {
        0 => Err(StorageError::ReadFailed),
        n => Ok(n),
    }
}

/// Stream exactly `size` bytes of `file`
///
/// Two chunk buffers alternate: the channel sends one while the next is read
/// from storage into the other.
async fn stream<S: LogStorage, W: Write>(
    storage: &mut S,
    buffers: &mut [[u8; TRANSFER_CHUNK]; 2],
    file: &mut S::File,
    size: u32,
    out: &mut W,
) -> Result<(), HandlerError<W::Error>> {
    let (head, tail) = buffers.split_at_mut(1);
    let mut front = &mut head[0];
    let mut back = &mut tail[0];

    let mut remaining = size as usize;
    let want = remaining.min(TRANSFER_CHUNK);
    let mut pending = read_chunk(storage, file, &mut front[..want])?;
    remaining -= pending;

    while pending > 0 {
        let want = remaining.min(TRANSFER_CHUNK);
        let (sent, next) = join(
            out.write_all(&front[..pending]),
            async { read_chunk(storage, file, &mut back[..want]) },
        )
        .await;
        sent.map_err(HandlerError::Channel)?;
        pending = next?;
        remaining -= pending;
        core::mem::swap(&mut front, &mut back);
    }
    Ok(())
}

/// Host-mode command handler
///
/// Serves one complete message at a time. Every failure that leaves the
/// channel usable is answered with `$ERROR`; only channel errors propagate.
pub struct HostProtocol<S, F, C> {
    storage: S,
    identity: IdentityStore<F>,
    clock: C,
    buffers: [[u8; TRANSFER_CHUNK]; 2],
}

impl<S: LogStorage, F: NvMemory, C: Clock> HostProtocol<S, F, C> {
    pub fn new(storage: S, identity: IdentityStore<F>, clock: C) -> Self {
        Self {
            storage,
            identity,
            clock,
            buffers: [[0; TRANSFER_CHUNK]; 2],
        }
    }

    /// Mount the log volume at mode entry
    pub fn mount(&mut self) -> Result<(), StorageError> {
        self.storage.mount()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn identity(&mut self) -> &mut IdentityStore<F> {
        &mut self.identity
    }

    /// Handle one received message, writing the full response to `out`
    pub async fn handle<W: Write>(&mut self, message: &[u8], out: &mut W) -> Result<(), W::Error> {
        match self.dispatch(message, out).await {
            Ok(()) => Ok(()),
            Err(HandlerError::Channel(e)) => Err(e),
            Err(HandlerError::Protocol(e)) => {
                warn!("host command failed: {}", e);
                out.write_all(response::ERROR).await
            }
        }
    }

    async fn dispatch<W: Write>(
        &mut self,
        message: &[u8],
        out: &mut W,
    ) -> Result<(), HandlerError<W::Error>> {
        let command = Command::parse(message)?;
        debug!("host command {}", command);

        match command {
            Command::SetId(id) => {
                self.identity.write(id)?;
                send(out, response::OK).await
            }
            Command::SetRtc(datetime) => {
                self.clock.set(&datetime)?;
                send(out, response::OK).await
            }
            Command::LoadInfo => self.load_info(out).await,
            Command::LoadList => self.load_list(out).await,
            Command::LoadAll => self.load_all(out).await,
            Command::LoadOne(name) => self.load_one(name, out).await,
            Command::DeleteAll => self.delete_all(out).await,
            Command::DeleteOne(name) => {
                self.storage.remove(name)?;
                send(out, response::OK).await
            }
        }
    }

    async fn load_info<W: Write>(&mut self, out: &mut W) -> Result<(), HandlerError<W::Error>> {
        let device_id = self.identity.read().unwrap_or(DEVICE_ID_INVALID);
        let capacity = self.storage.capacity()?;
        let now = self.clock.now()?;

        let line = response::info(device_id, &capacity, &now)?;
        send(out, line.as_bytes()).await?;
        send(out, response::OK).await
    }

    async fn load_list<W: Write>(&mut self, out: &mut W) -> Result<(), HandlerError<W::Error>> {
        let mut index = 0;
        while let Some(entry) = self.storage.entry(LOG_EXTENSION, index)? {
            send(out, response::entry(&entry)?.as_bytes()).await?;
            index += 1;
        }
        send(out, response::OK).await
    }

    async fn load_all<W: Write>(&mut self, out: &mut W) -> Result<(), HandlerError<W::Error>> {
        let mut index = 0;
        while let Some(mut entry) = self.storage.entry(LOG_EXTENSION, index)? {
            let mut file = self.storage.open(&entry.name)?;
            entry.size = self.storage.size(&file);

            let result = match response::entry_with_content(&entry) {
                Ok(header) => match send(out, header.as_bytes()).await {
                    Ok(()) => {
                        stream(&mut self.storage, &mut self.buffers, &mut file, entry.size, out)
                            .await
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e.into()),
            };
            let closed = self.storage.close(file);
            result?;
            closed?;

            send(out, response::FILE_END).await?;
            index += 1;
        }
        send(out, response::OK).await
    }

    async fn load_one<W: Write>(
        &mut self,
        name: &str,
        out: &mut W,
    ) -> Result<(), HandlerError<W::Error>> {
        let mut file = self.storage.open(name)?;
        let size = self.storage.size(&file);

        let result = match response::file_start(size) {
            Ok(header) => match send(out, header.as_bytes()).await {
                Ok(()) => stream(&mut self.storage, &mut self.buffers, &mut file, size, out).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e.into()),
        };
        let closed = self.storage.close(file);
        result?;
        closed?;

        send(out, response::FILE_END).await
    }

    async fn delete_all<W: Write>(&mut self, out: &mut W) -> Result<(), HandlerError<W::Error>> {
        let mut removed = 0u32;
        let mut last = None;
        while let Some(entry) = self.storage.entry(LOG_EXTENSION, 0)? {
            // A file that survives its own removal would loop forever
            if last.as_ref() == Some(&entry.name) {
                return Err(StorageError::DeleteFailed.into());
            }
            self.storage.remove(&entry.name)?;
            removed += 1;
            last = Some(entry.name);
        }
        info!("deleted {} log files", removed);
        send(out, response::OK).await
    }
}
