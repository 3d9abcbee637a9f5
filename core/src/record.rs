//! Fixed-size binary log records
//!
//! # Layout (16 bytes, little-endian)
//!
//! ```text
//! 0..4    time        ms since the start of the boot month
//! 4..10   payload     variant selected by `type`
//! 10..12  device_id
//! 12..14  checksum    over all 16 bytes with this field zeroed
//! 14      type
//! 15      end marker  0xA5
//! ```
//!
//! Payload variants:
//!
//! ```text
//! REPORT   hv_voltage:u16 hv_current:u16 lv_voltage:u16   (×10000)
//! EVENT    text:[u8; 6]
//! COMMAND  new_id:u16 time:u32
//! ERROR    time:u32 status:u8 pad:u8
//! ```

use crate::acquisition::Sample;
use crate::checksum::checksum;
use crate::config::RECORD_END_MARKER;

/// Encoded record length
pub const RECORD_LEN: usize = 16;

/// Encoded remote command length
pub const REMOTE_COMMAND_LEN: usize = 12;

/// Payload length shared by every variant
pub const PAYLOAD_LEN: usize = 6;

/// Fixed-point scale of report fields
pub const FIXED_SCALE: f32 = 10_000.0;

/// Largest encodable report value; anything at or above 6.5534 saturates here
pub const FIXED_MAX: u16 = 0xFFFE;

/// Report field value for a sample whose calibration was invalid
pub const FIXED_INVALID: u16 = 0xFFFF;

const CHECKSUM_RANGE: core::ops::Range<usize> = 12..14;

/// Record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RecordType {
    Report = 0x01,
    Event = 0x02,
    Command = 0x03,
    Error = 0x04,
}

impl TryFrom<u8> for RecordType {
    type Error = RecordError;

    fn try_from(value: u8) -> Result<Self, RecordError> {
        match value {
            0x01 => Ok(Self::Report),
            0x02 => Ok(Self::Event),
            0x03 => Ok(Self::Command),
            0x04 => Ok(Self::Error),
            other => Err(RecordError::UnknownType(other)),
        }
    }
}

/// Record decoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    /// Type byte is not a known tag
    UnknownType(u8),
    /// End marker byte missing
    BadEndMarker,
    /// Stored checksum does not match contents
    ChecksumMismatch,
}

impl core::fmt::Display for RecordError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownType(t) => write!(f, "Unknown record type 0x{:02x}", t),
            Self::BadEndMarker => write!(f, "Bad end marker"),
            Self::ChecksumMismatch => write!(f, "Checksum mismatch"),
        }
    }
}

impl core::error::Error for RecordError {}

/// Convert volts (or amps) to the ×10000 fixed-point report encoding
///
/// Truncates toward zero. Negative and NaN inputs encode as 0; inputs at or
/// above `FIXED_MAX / 10000` saturate to `FIXED_MAX`.
pub fn to_fixed(value: f32) -> u16 {
    // `!(value > 0.0)` also catches NaN
    if !(value > 0.0) {
        return 0;
    }
    let scaled = value * FIXED_SCALE;
    if scaled >= FIXED_MAX as f32 {
        FIXED_MAX
    } else {
        scaled as u16
    }
}

/// Calibrated bus measurement in fixed point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Report {
    pub hv_voltage: u16,
    pub hv_current: u16,
    pub lv_voltage: u16,
}

impl Report {
    /// Report emitted when the reference channel read zero
    pub const INVALID: Self = Self {
        hv_voltage: FIXED_INVALID,
        hv_current: FIXED_INVALID,
        lv_voltage: FIXED_INVALID,
    };

    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            hv_voltage: to_fixed(sample.hv_voltage),
            hv_current: to_fixed(sample.hv_current),
            lv_voltage: to_fixed(sample.lv_voltage),
        }
    }
}

/// Record payload; exactly one variant per record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Payload {
    Report(Report),
    Event([u8; PAYLOAD_LEN]),
    Command { new_id: u16, time: u32 },
    Error { time: u32, status: u8 },
}

impl Payload {
    /// Event payload from up to six bytes of text, zero-padded
    pub fn event(text: &[u8]) -> Self {
        let mut msg = [0u8; PAYLOAD_LEN];
        let len = text.len().min(PAYLOAD_LEN);
        msg[..len].copy_from_slice(&text[..len]);
        Self::Event(msg)
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Report(_) => RecordType::Report,
            Self::Event(_) => RecordType::Event,
            Self::Command { .. } => RecordType::Command,
            Self::Error { .. } => RecordType::Error,
        }
    }

    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut buf = [0u8; PAYLOAD_LEN];
        match self {
            Self::Report(report) => {
                buf[0..2].copy_from_slice(&report.hv_voltage.to_le_bytes());
                buf[2..4].copy_from_slice(&report.hv_current.to_le_bytes());
                buf[4..6].copy_from_slice(&report.lv_voltage.to_le_bytes());
            }
            Self::Event(msg) => buf = *msg,
            Self::Command { new_id, time } => {
                buf[0..2].copy_from_slice(&new_id.to_le_bytes());
                buf[2..6].copy_from_slice(&time.to_le_bytes());
            }
            Self::Error { time, status } => {
                buf[0..4].copy_from_slice(&time.to_le_bytes());
                buf[4] = *status;
            }
        }
        buf
    }

    pub fn decode(record_type: RecordType, buf: &[u8; PAYLOAD_LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        match record_type {
            RecordType::Report => Self::Report(Report {
                hv_voltage: u16_at(0),
                hv_current: u16_at(2),
                lv_voltage: u16_at(4),
            }),
            RecordType::Event => Self::Event(*buf),
            RecordType::Command => Self::Command {
                new_id: u16_at(0),
                time: u32_at(2),
            },
            RecordType::Error => Self::Error {
                time: u32_at(0),
                status: buf[4],
            },
        }
    }
}

/// One log entry as appended to the session file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogRecord {
    pub time: u32,
    pub payload: Payload,
    pub device_id: u16,
}

impl LogRecord {
    pub fn new(time: u32, payload: Payload, device_id: u16) -> Self {
        Self {
            time,
            payload,
            device_id,
        }
    }

    /// Encode with the checksum filled in
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&self.time.to_le_bytes());
        buf[4..10].copy_from_slice(&self.payload.encode());
        buf[10..12].copy_from_slice(&self.device_id.to_le_bytes());
        buf[14] = self.payload.record_type() as u8;
        buf[15] = RECORD_END_MARKER;

        let sum = checksum(&buf);
        buf[CHECKSUM_RANGE].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    /// Decode and verify an encoded record
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Result<Self, RecordError> {
        if bytes[15] != RECORD_END_MARKER {
            return Err(RecordError::BadEndMarker);
        }
        if !Self::verify(bytes) {
            return Err(RecordError::ChecksumMismatch);
        }
        let record_type = RecordType::try_from(bytes[14])?;
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[4..10]);

        Ok(Self {
            time: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            payload: Payload::decode(record_type, &payload),
            device_id: u16::from_le_bytes([bytes[10], bytes[11]]),
        })
    }

    /// Recompute the checksum with its field zeroed and compare
    pub fn verify(bytes: &[u8; RECORD_LEN]) -> bool {
        let mut copy = *bytes;
        let stored = u16::from_le_bytes([copy[12], copy[13]]);
        copy[CHECKSUM_RANGE].fill(0);
        checksum(&copy) == stored
    }
}

/// Payloads a remote command may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RemotePayload {
    Event([u8; PAYLOAD_LEN]),
    Command { new_id: u16, time: u32 },
}

impl From<RemotePayload> for Payload {
    fn from(payload: RemotePayload) -> Self {
        match payload {
            RemotePayload::Event(msg) => Payload::Event(msg),
            RemotePayload::Command { new_id, time } => Payload::Command { new_id, time },
        }
    }
}

/// Addressed command envelope for radio dispatch
///
/// ```text
/// 0..2   target device id
/// 2..8   payload
/// 8..10  checksum
/// 10     type
/// 11     end marker
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RemoteCommand {
    pub target: u16,
    pub payload: RemotePayload,
}

impl RemoteCommand {
    pub fn to_bytes(&self) -> [u8; REMOTE_COMMAND_LEN] {
        let payload = Payload::from(self.payload);
        let mut buf = [0u8; REMOTE_COMMAND_LEN];
        buf[0..2].copy_from_slice(&self.target.to_le_bytes());
        buf[2..8].copy_from_slice(&payload.encode());
        buf[10] = payload.record_type() as u8;
        buf[11] = RECORD_END_MARKER;

        let sum = checksum(&buf);
        buf[8..10].copy_from_slice(&sum.to_le_bytes());
        buf
    }
}
