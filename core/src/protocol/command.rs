//! Host command parsing

use hal_abstractions::{DateTime, MAX_NAME_LEN};

use crate::config::{DEVICE_ID_BROADCAST, MAX_MESSAGE_LEN};
use crate::time;

/// Sentinel starting every command and response
pub const PREFIX: char = '$';

/// Parsed host command; name parameters borrow from the received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command<'a> {
    SetId(u16),
    SetRtc(DateTime),
    LoadInfo,
    LoadList,
    LoadAll,
    LoadOne(&'a str),
    DeleteAll,
    DeleteOne(&'a str),
}

/// Malformed host command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    Empty,
    TooLong,
    MissingPrefix,
    NotAscii,
    UnknownCommand,
    MissingParameter,
    UnexpectedParameter,
    /// Not exactly five digits, or a reserved id
    InvalidId,
    InvalidDateTime,
    /// `<len> <name>` without the space
    MissingSeparator,
    InvalidLength,
    InvalidName,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty message"),
            Self::TooLong => write!(f, "Message too long"),
            Self::MissingPrefix => write!(f, "Missing '$' prefix"),
            Self::NotAscii => write!(f, "Message is not ASCII"),
            Self::UnknownCommand => write!(f, "Unknown command"),
            Self::MissingParameter => write!(f, "Missing parameter"),
            Self::UnexpectedParameter => write!(f, "Unexpected parameter"),
            Self::InvalidId => write!(f, "Invalid device id"),
            Self::InvalidDateTime => write!(f, "Invalid date/time"),
            Self::MissingSeparator => write!(f, "Missing length separator"),
            Self::InvalidLength => write!(f, "Invalid name length"),
            Self::InvalidName => write!(f, "Invalid file name"),
        }
    }
}

impl core::error::Error for ParseError {}

impl<'a> Command<'a> {
    /// Parse one received message
    ///
    /// Trailing CR, LF and NUL bytes are ignored. A parameter is separated
    /// from the command by exactly one space.
    pub fn parse(message: &'a [u8]) -> Result<Self, ParseError> {
        let end = message
            .iter()
            .rposition(|b| !matches!(b, b'\r' | b'\n' | 0))
            .map_or(0, |i| i + 1);
        let message = &message[..end];

        if message.is_empty() {
            return Err(ParseError::Empty);
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(ParseError::TooLong);
        }
        if !message.is_ascii() {
            return Err(ParseError::NotAscii);
        }
        let text = core::str::from_utf8(message).map_err(|_| ParseError::NotAscii)?;
        let text = text.strip_prefix(PREFIX).ok_or(ParseError::MissingPrefix)?;

        let (token, parameter) = match text.split_once(' ') {
            Some((token, parameter)) => (token, Some(parameter)),
            None => (text, None),
        };

        let command = match token {
            "SET-ID" => Self::SetId(parse_id(required(parameter)?)?),
            "SET-RTC" => Self::SetRtc(
                time::parse_short(required(parameter)?).ok_or(ParseError::InvalidDateTime)?,
            ),
            "LOAD-ONE" => Self::LoadOne(parse_name(required(parameter)?)?),
            "DELETE-ONE" => Self::DeleteOne(parse_name(required(parameter)?)?),
            "LOAD-INFO" | "LOAD-LIST" | "LOAD-ALL" | "DELETE-ALL" => {
                if parameter.is_some() {
                    return Err(ParseError::UnexpectedParameter);
                }
                match token {
                    "LOAD-INFO" => Self::LoadInfo,
                    "LOAD-LIST" => Self::LoadList,
                    "LOAD-ALL" => Self::LoadAll,
                    _ => Self::DeleteAll,
                }
            }
            _ => return Err(ParseError::UnknownCommand),
        };
        Ok(command)
    }
}

fn required(parameter: Option<&str>) -> Result<&str, ParseError> {
    match parameter {
        Some(p) if !p.is_empty() => Ok(p),
        _ => Err(ParseError::MissingParameter),
    }
}

/// Exactly five decimal digits, excluding the reserved ids
fn parse_id(text: &str) -> Result<u16, ParseError> {
    if text.len() != 5 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidId);
    }
    let id: u32 = text.parse().map_err(|_| ParseError::InvalidId)?;
    if id >= DEVICE_ID_BROADCAST as u32 {
        return Err(ParseError::InvalidId);
    }
    Ok(id as u16)
}

/// `<len> <name>`; the name is everything after the first space
fn parse_name(text: &str) -> Result<&str, ParseError> {
    let (length, name) = text.split_once(' ').ok_or(ParseError::MissingSeparator)?;

    if length.is_empty() || length.len() > 3 || !length.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidLength);
    }
    let length: usize = length.parse().map_err(|_| ParseError::InvalidLength)?;
    if length == 0 || length > MAX_NAME_LEN {
        return Err(ParseError::InvalidLength);
    }

    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains(['/', '\\']) {
        return Err(ParseError::InvalidName);
    }
    Ok(name)
}
