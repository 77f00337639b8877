//! Primitive little-endian readers and the composite field codecs shared
//! by every header and packet layout.
//!
//! Readers take `&mut &[u8]` and consume what they decode, failing with
//! `UnexpectedEof` instead of panicking when the slice runs short.

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

use crate::filespec::FileSpec;
use crate::nevnsx_error::NevNsxError;

pub fn read_le_u8(input: &mut &[u8]) -> Result<u8, NevNsxError> {
    let bytes = read_bytes(input, 1, "u8")?;
    Ok(bytes[0])
}

pub fn read_le_u16(input: &mut &[u8]) -> Result<u16, NevNsxError> {
    let bytes = read_bytes(input, 2, "u16")?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_le_u32(input: &mut &[u8]) -> Result<u32, NevNsxError> {
    let bytes = read_bytes(input, 4, "u32")?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_le_u64(input: &mut &[u8]) -> Result<u64, NevNsxError> {
    let bytes = read_bytes(input, 8, "u64")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

pub fn read_le_i8(input: &mut &[u8]) -> Result<i8, NevNsxError> {
    Ok(read_le_u8(input)? as i8)
}

pub fn read_le_i16(input: &mut &[u8]) -> Result<i16, NevNsxError> {
    Ok(read_le_u16(input)? as i16)
}

pub fn read_le_f32(input: &mut &[u8]) -> Result<f32, NevNsxError> {
    Ok(f32::from_bits(read_le_u32(input)?))
}

/// Split `n` bytes off the front of the input, or fail with how many
/// bytes were missing.
pub fn read_bytes<'a>(
    input: &mut &'a [u8],
    n: usize,
    what: &'static str,
) -> Result<&'a [u8], NevNsxError> {
    if input.len() < n {
        return Err(NevNsxError::UnexpectedEof(n - input.len(), what));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Decode a Latin-1 byte slice, truncating at the first NUL.
pub fn latin1_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].iter().map(|&b| b as char).collect()
}

/// Read a fixed-width Latin-1 string field, truncated at the first NUL.
pub fn read_fixed_string(
    input: &mut &[u8],
    n: usize,
    what: &'static str,
) -> Result<String, NevNsxError> {
    Ok(latin1_string(read_bytes(input, n, what)?))
}

/// Two `u8` version bytes, e.g. `2` `3` for spec 2.3.
pub fn read_filespec(input: &mut &[u8]) -> Result<FileSpec, NevNsxError> {
    let major = read_le_u8(input)?;
    let minor = read_le_u8(input)?;
    Ok(FileSpec::new(major, minor))
}

/// Eight `u16` words: year, month, day-of-week (discarded), day, hour,
/// minute, second, millisecond. Files in the wild carry zeroed origins,
/// which chrono rejects; those coerce to the epoch with a warning.
pub fn read_time_origin(input: &mut &[u8]) -> Result<NaiveDateTime, NevNsxError> {
    let year = read_le_u16(input)?;
    let month = read_le_u16(input)?;
    let _day_of_week = read_le_u16(input)?;
    let day = read_le_u16(input)?;
    let hour = read_le_u16(input)?;
    let minute = read_le_u16(input)?;
    let second = read_le_u16(input)?;
    let millisecond = read_le_u16(input)?;
    let parsed = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).and_then(|d| {
        d.and_hms_milli_opt(hour as u32, minute as u32, second as u32, millisecond as u32)
    });
    match parsed {
        Some(t) => Ok(t),
        None => {
            warn!(
                "invalid time origin {}-{}-{} {}:{}:{}.{}, using epoch",
                year, month, day, hour, minute, second, millisecond
            );
            Ok(epoch())
        }
    }
}

pub fn epoch() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// Filter descriptor in channel headers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    Butterworth,
}

impl FilterType {
    pub fn from_u16(val: u16) -> Result<FilterType, NevNsxError> {
        match val {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Butterworth),
            _ => Err(NevNsxError::InvariantViolation(format!(
                "unknown filter type {}",
                val
            ))),
        }
    }

    pub fn value(&self) -> u16 {
        match self {
            FilterType::None => 0,
            FilterType::Butterworth => 1,
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterType::None => write!(f, "none"),
            FilterType::Butterworth => write!(f, "butterworth"),
        }
    }
}

/// Digital input mode in DIGLABEL headers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalMode {
    Serial,
    Parallel,
}

impl DigitalMode {
    pub fn from_u8(val: u8) -> DigitalMode {
        if val == 0 {
            DigitalMode::Serial
        } else {
            DigitalMode::Parallel
        }
    }
}

impl fmt::Display for DigitalMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DigitalMode::Serial => write!(f, "serial"),
            DigitalMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Digital trigger configuration in NSASEXEV headers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalConfig {
    Ignored,
    Active,
}

impl DigitalConfig {
    pub fn from_u8(val: u8) -> DigitalConfig {
        if val & 0x01 != 0 {
            DigitalConfig::Active
        } else {
            DigitalConfig::Ignored
        }
    }
}

/// Analog trigger edge configuration in NSASEXEV headers. Bit 0 wins
/// over bit 1.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogConfig {
    None,
    LowToHigh,
    HighToLow,
}

impl AnalogConfig {
    pub fn from_u8(val: u8) -> AnalogConfig {
        if val & 0x01 != 0 {
            AnalogConfig::LowToHigh
        } else if val & 0x02 != 0 {
            AnalogConfig::HighToLow
        } else {
            AnalogConfig::None
        }
    }
}

impl fmt::Display for AnalogConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AnalogConfig::None => write!(f, "none"),
            AnalogConfig::LowToHigh => write!(f, "low_to_high"),
            AnalogConfig::HighToLow => write!(f, "high_to_low"),
        }
    }
}

/// Trackable object geometry in TRACKOBJ headers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingObjectType {
    Undefined,
    Rb2dMarkers,
    Rb2dBlob,
    Rb3dMarkers,
    Boundary2d,
    MarkerSize,
    Error,
}

impl TrackingObjectType {
    pub fn from_u16(val: u16) -> TrackingObjectType {
        match val {
            0 => TrackingObjectType::Undefined,
            1 => TrackingObjectType::Rb2dMarkers,
            2 => TrackingObjectType::Rb2dBlob,
            3 => TrackingObjectType::Rb3dMarkers,
            4 => TrackingObjectType::Boundary2d,
            5 => TrackingObjectType::MarkerSize,
            _ => TrackingObjectType::Error,
        }
    }
}

impl fmt::Display for TrackingObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrackingObjectType::Undefined => write!(f, "undefined"),
            TrackingObjectType::Rb2dMarkers => write!(f, "2D RB markers"),
            TrackingObjectType::Rb2dBlob => write!(f, "2D RB blob"),
            TrackingObjectType::Rb3dMarkers => write!(f, "3D RB markers"),
            TrackingObjectType::Boundary2d => write!(f, "2D boundary"),
            TrackingObjectType::MarkerSize => write!(f, "marker size"),
            TrackingObjectType::Error => write!(f, "error"),
        }
    }
}

/// Corner frequencies are stored in millihertz.
pub fn millihertz_to_hz(raw: u32) -> f64 {
    raw as f64 / 1000.0
}

pub fn hz_to_millihertz(hz: f64) -> u32 {
    (hz * 1000.0).round() as u32
}

/// Write a Latin-1 string into a fixed-width field, NUL padded, silently
/// truncated if too long.
pub fn write_fixed_string<W: Write>(
    out: &mut W,
    s: &str,
    n: usize,
) -> Result<(), NevNsxError> {
    let mut field = vec![0u8; n];
    for (slot, ch) in field.iter_mut().zip(s.chars()) {
        *slot = if (ch as u32) < 256 { ch as u8 } else { b'?' };
    }
    out.write_all(&field)?;
    Ok(())
}

/// Write a civil timestamp back as the eight `u16` origin words.
pub fn write_time_origin<W: Write>(
    out: &mut W,
    t: &NaiveDateTime,
) -> Result<(), NevNsxError> {
    use chrono::{Datelike, Timelike};
    out.write_u16::<LittleEndian>(t.year() as u16)?;
    out.write_u16::<LittleEndian>(t.month() as u16)?;
    out.write_u16::<LittleEndian>(t.weekday().num_days_from_sunday() as u16)?;
    out.write_u16::<LittleEndian>(t.day() as u16)?;
    out.write_u16::<LittleEndian>(t.hour() as u16)?;
    out.write_u16::<LittleEndian>(t.minute() as u16)?;
    out.write_u16::<LittleEndian>(t.second() as u16)?;
    out.write_u16::<LittleEndian>((t.nanosecond() / 1_000_000) as u16)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_u32_buf() {
        let buf: [u8; 5] = [1, 0, 0, 0, 5];
        let mut bytes = &buf[0..5];
        assert_eq!(read_le_u32(&mut bytes).unwrap(), 1);
        assert_eq!(bytes[0], 5);
    }

    #[test]
    fn read_short_buf() {
        let buf: [u8; 2] = [1, 0];
        let mut bytes = &buf[0..2];
        match read_le_u32(&mut bytes) {
            Err(NevNsxError::UnexpectedEof(missing, _)) => assert_eq!(missing, 2),
            other => panic!("expected UnexpectedEof, got {:?}", other),
        }
    }

    #[test]
    fn strip_string_at_nul() {
        let buf = b"NEURALEV\x00\x00junk";
        let mut bytes = &buf[..];
        let s = read_fixed_string(&mut bytes, 10, "FileTypeID").unwrap();
        assert_eq!(s, "NEURALEV");
        assert_eq!(bytes, b"junk");
    }

    #[test]
    fn time_origin_round_trip() {
        let mut raw = Vec::new();
        for v in [2021u16, 11, 5, 12, 13, 30, 59, 250] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let mut bytes = &raw[..];
        let t = read_time_origin(&mut bytes).unwrap();
        let mut out = Vec::new();
        write_time_origin(&mut out, &t).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn bad_time_origin_is_epoch() {
        let raw = [0u8; 16];
        let mut bytes = &raw[..];
        assert_eq!(read_time_origin(&mut bytes).unwrap(), epoch());
    }

    #[test]
    fn filter_type_rejects_unknown() {
        assert_eq!(FilterType::from_u16(0).unwrap(), FilterType::None);
        assert_eq!(FilterType::from_u16(1).unwrap(), FilterType::Butterworth);
        assert!(FilterType::from_u16(2).is_err());
    }

    #[test]
    fn analog_config_bits() {
        assert_eq!(AnalogConfig::from_u8(0), AnalogConfig::None);
        assert_eq!(AnalogConfig::from_u8(1), AnalogConfig::LowToHigh);
        assert_eq!(AnalogConfig::from_u8(2), AnalogConfig::HighToLow);
        assert_eq!(AnalogConfig::from_u8(3), AnalogConfig::LowToHigh);
    }

    #[test]
    fn tracking_object_names() {
        assert_eq!(TrackingObjectType::from_u16(1).to_string(), "2D RB markers");
        assert_eq!(TrackingObjectType::from_u16(99), TrackingObjectType::Error);
    }
}
