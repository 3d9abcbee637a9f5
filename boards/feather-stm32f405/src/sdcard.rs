//! FAT log volume on the SPI SD card
//!
//! Uses the raw-handle API of embedded-sdmmc so the volume manager owns the
//! card for the rest of the program lifetime and file handles are plain
//! `Copy` values.
//!
//! # File names
//!
//! embedded-sdmmc only speaks 8.3 short names. Session files go into one
//! directory per device id, named by [`fat_name`]; listings turn them back
//! into `<id> <YYYY-MM-DD-HH-mm-ss>.log`. Plain 8.3 names stay in the root.

use defmt::{info, warn, Debug2Format};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_stm32::{peripherals, Peri};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{
    DirEntry, Error, Mode, RawDirectory, RawFile, RawVolume, SdCard, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};
use energymeter_core::fat_name::{self, ShortDir, ShortPath};
use hal_abstractions::{Capacity, Clock, FileEntry, FileName, LogStorage, StorageError};

use crate::rtc::RtcClock;

/// Block size of SD cards in SPI mode
const SECTOR_SIZE: u32 = 512;

/// Card identification clock
const INIT_FREQUENCY: Hertz = Hertz(400_000);

/// Working SPI clock once the card is initialized
const WORK_FREQUENCY: Hertz = Hertz(16_000_000);

type SdSpi = Spi<'static, Blocking>;
type SdSpiDevice = ExclusiveDevice<SdSpi, Output<'static>, Delay>;
type SdVolumeManager = VolumeManager<SdCard<SdSpiDevice, Delay>, FileTime>;

/// Directory timestamps from the RTC, falling back to 2000-01-01
pub struct FileTime;

impl TimeSource for FileTime {
    fn get_timestamp(&self) -> Timestamp {
        match RtcClock.now() {
            Ok(now) => Timestamp {
                year_since_1970: (now.full_year() - 1970) as u8,
                zero_indexed_month: now.month() - 1,
                zero_indexed_day: now.day() - 1,
                hours: now.hour(),
                minutes: now.minute(),
                seconds: now.second(),
            },
            Err(_) => Timestamp {
                year_since_1970: 30,
                zero_indexed_month: 0,
                zero_indexed_day: 0,
                hours: 0,
                minutes: 0,
                seconds: 0,
            },
        }
    }
}

/// SD breakout on SPI2 (FeatherWing header), chip select on PC6
pub struct SdPeripherals {
    pub spi: Peri<'static, peripherals::SPI2>,
    pub sck: Peri<'static, peripherals::PB13>,
    pub mosi: Peri<'static, peripherals::PB15>,
    pub miso: Peri<'static, peripherals::PB14>,
    pub cs: Peri<'static, peripherals::PC6>,
}

pub struct SdStorage {
    volume_mgr: SdVolumeManager,
    volume: Option<RawVolume>,
    root: Option<RawDirectory>,
    total_sectors: u32,
}

impl SdStorage {
    /// Initialise the card and switch the bus to its working clock
    ///
    /// A card that does not answer still yields a storage handle; every
    /// later operation then fails with a [`StorageError`].
    pub fn new(periph: SdPeripherals) -> Self {
        let mut config = spi::Config::default();
        config.frequency = INIT_FREQUENCY;
        let spi = Spi::new_blocking(periph.spi, periph.sck, periph.mosi, periph.miso, config);
        let cs = Output::new(periph.cs, Level::High, Speed::VeryHigh);

        let device = ExclusiveDevice::new(spi, cs, Delay).unwrap_or_else(|e| match e {});
        let card = SdCard::new(device, Delay);

        let total_sectors = match card.num_bytes() {
            Ok(bytes) => {
                info!("SD card: {} MB", bytes / (1024 * 1024));
                (bytes / SECTOR_SIZE as u64) as u32
            }
            Err(e) => {
                warn!("SD card not responding: {:?}", Debug2Format(&e));
                0
            }
        };

        card.spi(|dev| {
            let mut config = spi::Config::default();
            config.frequency = WORK_FREQUENCY;
            if dev.bus_mut().set_config(&config).is_err() {
                warn!("SD SPI clock unchanged");
            }
        });

        Self {
            volume_mgr: VolumeManager::new(card, FileTime),
            volume: None,
            root: None,
            total_sectors,
        }
    }

    fn root(&self) -> Result<RawDirectory, StorageError> {
        self.root.ok_or(StorageError::MountFailed)
    }

    /// Open a device directory, creating it first when asked to
    fn enter_dir(
        &mut self,
        root: RawDirectory,
        name: &str,
        create: bool,
    ) -> Result<RawDirectory, StorageError> {
        match self.volume_mgr.open_dir(root, name) {
            Err(Error::NotFound) if create => {
                self.volume_mgr
                    .make_dir_in_dir(root, name)
                    .map_err(|e| not_found_or(e, StorageError::OpenFailed))?;
                info!("created device directory {}", name);
                self.volume_mgr
                    .open_dir(root, name)
                    .map_err(|e| not_found_or(e, StorageError::OpenFailed))
            }
            result => result.map_err(|e| not_found_or(e, StorageError::OpenFailed)),
        }
    }

    fn leave_dir(&mut self, dir: RawDirectory) {
        if self.volume_mgr.close_dir(dir).is_err() {
            warn!("directory handle not released");
        }
    }

    /// Open `name` at its short path
    fn open_path(&mut self, name: &str, mode: Mode, create: bool) -> Result<RawFile, StorageError> {
        let root = self.root()?;
        let ShortPath { dir, file } = fat_name::to_short(name)?;
        let Some(dir) = dir else {
            return self
                .volume_mgr
                .open_file_in_dir(root, file.as_str(), mode)
                .map_err(|e| not_found_or(e, StorageError::OpenFailed));
        };

        let handle = self.enter_dir(root, &dir, create)?;
        // File handles stay valid once their directory is closed
        let opened = self
            .volume_mgr
            .open_file_in_dir(handle, file.as_str(), mode)
            .map_err(|e| not_found_or(e, StorageError::OpenFailed));
        self.leave_dir(handle);
        opened
    }

    /// The `n`th device directory in the root
    fn device_dir(&mut self, root: RawDirectory, n: usize) -> Result<Option<ShortDir>, StorageError> {
        let mut seen = 0usize;
        let mut found = None;
        self.volume_mgr
            .iterate_dir(root, |entry| {
                if found.is_some() || !entry.attributes.is_directory() {
                    return;
                }
                let Ok(base) = core::str::from_utf8(entry.name.base_name()) else {
                    return;
                };
                if fat_name::parse_device_dir(base).is_none() {
                    return;
                }
                if seen == n {
                    found = ShortDir::try_from(base).ok();
                }
                seen += 1;
            })
            .map_err(|_| StorageError::Io)?;
        Ok(found)
    }

    /// Walk the files of one directory, counting listed entries in `seen`
    fn find_entry(
        &mut self,
        dir: RawDirectory,
        dir_name: Option<&str>,
        extension: &str,
        index: usize,
        seen: &mut usize,
    ) -> Result<Option<FileEntry>, StorageError> {
        let mut found = None;
        self.volume_mgr
            .iterate_dir(dir, |entry| {
                if found.is_some() || !is_listed_file(entry, extension) {
                    return;
                }
                let Some(name) = display_name(dir_name, entry) else {
                    return;
                };
                if *seen == index {
                    found = Some(FileEntry {
                        name,
                        size: entry.size,
                    });
                }
                *seen += 1;
            })
            .map_err(|_| StorageError::Io)?;
        Ok(found)
    }

    fn sectors_in(&mut self, dir: RawDirectory) -> Result<u32, StorageError> {
        let mut used = 0u32;
        self.volume_mgr
            .iterate_dir(dir, |entry| {
                if !entry.attributes.is_directory() && !entry.attributes.is_volume() {
                    used = used.saturating_add(entry.size.div_ceil(SECTOR_SIZE));
                }
            })
            .map_err(|_| StorageError::Io)?;
        Ok(used)
    }

    fn sectors_used(&mut self, root: RawDirectory) -> Result<u32, StorageError> {
        let mut used = self.sectors_in(root)?;
        let mut n = 0;
        while let Some(name) = self.device_dir(root, n)? {
            let dir = self.enter_dir(root, &name, false)?;
            let sectors = self.sectors_in(dir);
            self.leave_dir(dir);
            used = used.saturating_add(sectors?);
            n += 1;
        }
        Ok(used)
    }
}

fn is_listed_file(entry: &DirEntry, extension: &str) -> bool {
    !entry.attributes.is_directory()
        && !entry.attributes.is_volume()
        && entry
            .name
            .extension()
            .eq_ignore_ascii_case(extension.as_bytes())
}

fn display_name(dir: Option<&str>, entry: &DirEntry) -> Option<FileName> {
    let base = core::str::from_utf8(entry.name.base_name()).ok()?;
    let ext = core::str::from_utf8(entry.name.extension()).ok()?;
    fat_name::from_short(dir, base, ext)
}

fn not_found_or<E>(error: Error<E>, other: StorageError) -> StorageError {
    match error {
        Error::NotFound => StorageError::NotFound,
        Error::DiskFull => StorageError::Full,
        _ => other,
    }
}

impl LogStorage for SdStorage {
    type File = RawFile;

    fn mount(&mut self) -> Result<(), StorageError> {
        if self.root.is_some() {
            return Ok(());
        }
        let volume = match self.volume {
            Some(volume) => volume,
            None => {
                let volume = self
                    .volume_mgr
                    .open_raw_volume(VolumeIdx(0))
                    .map_err(|e| {
                        warn!("SD volume open failed: {:?}", Debug2Format(&e));
                        StorageError::MountFailed
                    })?;
                self.volume = Some(volume);
                volume
            }
        };
        let root = self
            .volume_mgr
            .open_root_dir(volume)
            .map_err(|_| StorageError::MountFailed)?;
        self.root = Some(root);
        info!("SD volume mounted");
        Ok(())
    }

    fn create(&mut self, name: &str) -> Result<RawFile, StorageError> {
        let file = self.open_path(name, Mode::ReadWriteCreateOrTruncate, true)?;
        info!("log file {} created", name);
        Ok(file)
    }

    fn open(&mut self, name: &str) -> Result<RawFile, StorageError> {
        self.open_path(name, Mode::ReadOnly, false)
    }

    fn append(&mut self, file: &mut RawFile, data: &[u8]) -> Result<(), StorageError> {
        self.volume_mgr
            .write(*file, data)
            .map_err(|e| not_found_or(e, StorageError::WriteFailed))
    }

    fn read(&mut self, file: &mut RawFile, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.volume_mgr
            .read(*file, buf)
            .map_err(|e| not_found_or(e, StorageError::ReadFailed))
    }

    fn flush(&mut self, file: &mut RawFile) -> Result<(), StorageError> {
        self.volume_mgr
            .flush_file(*file)
            .map_err(|_| StorageError::FlushFailed)
    }

    fn close(&mut self, file: RawFile) -> Result<(), StorageError> {
        self.volume_mgr
            .close_file(file)
            .map_err(|_| StorageError::Io)
    }

    fn size(&self, file: &RawFile) -> u32 {
        self.volume_mgr.file_length(*file).unwrap_or(0)
    }

    fn entry(&mut self, extension: &str, index: usize) -> Result<Option<FileEntry>, StorageError> {
        let root = self.root()?;
        let mut seen = 0usize;
        if let Some(entry) = self.find_entry(root, None, extension, index, &mut seen)? {
            return Ok(Some(entry));
        }

        let mut n = 0;
        while let Some(name) = self.device_dir(root, n)? {
            let dir = self.enter_dir(root, &name, false)?;
            let found = self.find_entry(dir, Some(name.as_str()), extension, index, &mut seen);
            self.leave_dir(dir);
            if let Some(entry) = found? {
                return Ok(Some(entry));
            }
            n += 1;
        }
        Ok(None)
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        let root = self.root()?;
        let ShortPath { dir, file } = fat_name::to_short(name)?;
        let Some(dir) = dir else {
            return self
                .volume_mgr
                .delete_file_in_dir(root, file.as_str())
                .map_err(|e| not_found_or(e, StorageError::DeleteFailed));
        };

        let handle = self.enter_dir(root, &dir, false)?;
        let removed = self
            .volume_mgr
            .delete_file_in_dir(handle, file.as_str())
            .map_err(|e| not_found_or(e, StorageError::DeleteFailed));
        self.leave_dir(handle);
        removed
    }

    /// Free space as the card size less the sectors held by log-volume files
    ///
    /// An approximation: FAT tables, reserved sectors, directory clusters and
    /// cluster slack are not counted, so free space is overstated by that
    /// overhead.
    fn capacity(&mut self) -> Result<Capacity, StorageError> {
        let root = self.root()?;
        let used = self.sectors_used(root)?;
        Ok(Capacity {
            total_sectors: self.total_sectors,
            free_sectors: self.total_sectors.saturating_sub(used),
            sector_size: SECTOR_SIZE,
        })
    }
}
