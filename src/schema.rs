//! Table-driven header decoding.
//!
//! Every header and packet-header kind is described as a const slice of
//! `FieldDef` entries: a field name, a fixed-width format, and a
//! post-transform. The walker computes the exact byte width of the
//! table, reads that many bytes, unpacks the raw values and applies the
//! post-transforms, yielding an ordered `HeaderFields` mapping. Typed
//! header structs are then built from the mapping.

use chrono::NaiveDateTime;

use crate::codec;
use crate::codec::{
    AnalogConfig, DigitalConfig, DigitalMode, FilterType, TrackingObjectType,
};
use crate::filespec::FileSpec;
use crate::nevnsx_error::NevNsxError;

/// Fixed-width wire format of a single field.
#[derive(Debug, Clone, Copy)]
pub enum Fmt {
    U8,
    U16,
    U32,
    I16,
    F32,
    Bool,
    /// Fixed-width Latin-1 string, truncated at the first NUL.
    Str(usize),
    /// Reserved bytes, read and discarded.
    Skip(usize),
    /// Two `u8` version bytes.
    Version,
    /// Eight `u16` civil time words.
    TimeOrigin,
}

impl Fmt {
    pub fn width(&self) -> usize {
        match self {
            Fmt::U8 | Fmt::Bool => 1,
            Fmt::U16 | Fmt::I16 => 2,
            Fmt::U32 | Fmt::F32 => 4,
            Fmt::Str(n) | Fmt::Skip(n) => *n,
            Fmt::Version => 2,
            Fmt::TimeOrigin => 16,
        }
    }
}

/// Post-transform applied to the raw value.
#[derive(Debug, Clone, Copy)]
pub enum Post {
    None,
    /// `u32` millihertz to Hz.
    Freq,
    /// `u16` filter code to `FilterType`.
    Filter,
    /// `bool` to serial/parallel.
    DigMode,
    /// `u8` bit 0 to active/ignored.
    DigConfig,
    /// `u8` edge bits to `AnalogConfig`.
    AnaConfig,
    /// `u16` to `TrackingObjectType`.
    TrackObj,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub fmt: Fmt,
    pub post: Post,
}

const fn field(name: &'static str, fmt: Fmt) -> FieldDef {
    FieldDef {
        name,
        fmt,
        post: Post::None,
    }
}

const fn field_with(name: &'static str, fmt: Fmt, post: Post) -> FieldDef {
    FieldDef { name, fmt, post }
}

/// A decoded field value; the sum type over every post-transform output.
#[derive(Debug, Clone)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    I16(i16),
    F32(f32),
    Bool(bool),
    Str(String),
    Spec(FileSpec),
    Time(NaiveDateTime),
    Freq(f64),
    Filter(FilterType),
    DigMode(DigitalMode),
    DigConfig(DigitalConfig),
    AnaConfig(AnalogConfig),
    TrackObj(TrackingObjectType),
    Skipped,
}

/// An ordered name-to-value mapping for one decoded header instance.
#[derive(Debug, Clone)]
pub struct HeaderFields(Vec<(&'static str, Value)>);

impl HeaderFields {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    fn missing(name: &'static str) -> NevNsxError {
        NevNsxError::FieldAccess(name)
    }

    pub fn u8(&self, name: &'static str) -> Result<u8, NevNsxError> {
        match self.get(name) {
            Some(Value::U8(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn u16(&self, name: &'static str) -> Result<u16, NevNsxError> {
        match self.get(name) {
            Some(Value::U16(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn u32(&self, name: &'static str) -> Result<u32, NevNsxError> {
        match self.get(name) {
            Some(Value::U32(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn i16(&self, name: &'static str) -> Result<i16, NevNsxError> {
        match self.get(name) {
            Some(Value::I16(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn f32(&self, name: &'static str) -> Result<f32, NevNsxError> {
        match self.get(name) {
            Some(Value::F32(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn string(&self, name: &'static str) -> Result<String, NevNsxError> {
        match self.get(name) {
            Some(Value::Str(v)) => Ok(v.clone()),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn spec(&self, name: &'static str) -> Result<FileSpec, NevNsxError> {
        match self.get(name) {
            Some(Value::Spec(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn time(&self, name: &'static str) -> Result<NaiveDateTime, NevNsxError> {
        match self.get(name) {
            Some(Value::Time(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn freq(&self, name: &'static str) -> Result<f64, NevNsxError> {
        match self.get(name) {
            Some(Value::Freq(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn filter(&self, name: &'static str) -> Result<FilterType, NevNsxError> {
        match self.get(name) {
            Some(Value::Filter(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn dig_mode(&self, name: &'static str) -> Result<DigitalMode, NevNsxError> {
        match self.get(name) {
            Some(Value::DigMode(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn dig_config(&self, name: &'static str) -> Result<DigitalConfig, NevNsxError> {
        match self.get(name) {
            Some(Value::DigConfig(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn ana_config(&self, name: &'static str) -> Result<AnalogConfig, NevNsxError> {
        match self.get(name) {
            Some(Value::AnaConfig(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }

    pub fn track_obj(&self, name: &'static str) -> Result<TrackingObjectType, NevNsxError> {
        match self.get(name) {
            Some(Value::TrackObj(v)) => Ok(*v),
            _ => Err(Self::missing(name)),
        }
    }
}

/// Exact byte width of one header instance described by `table`.
pub fn byte_width(table: &[FieldDef]) -> usize {
    table.iter().map(|f| f.fmt.width()).sum()
}

/// Walk a layout table over the input, consuming exactly
/// `byte_width(table)` bytes.
pub fn decode(table: &[FieldDef], input: &mut &[u8]) -> Result<HeaderFields, NevNsxError> {
    let width = byte_width(table);
    if input.len() < width {
        return Err(NevNsxError::UnexpectedEof(
            width - input.len(),
            "header fields",
        ));
    }
    let mut fields = Vec::with_capacity(table.len());
    for def in table {
        let value = decode_field(def, input)?;
        fields.push((def.name, value));
    }
    Ok(HeaderFields(fields))
}

fn decode_field(def: &FieldDef, input: &mut &[u8]) -> Result<Value, NevNsxError> {
    let raw = match def.fmt {
        Fmt::U8 => Value::U8(codec::read_le_u8(input)?),
        Fmt::U16 => Value::U16(codec::read_le_u16(input)?),
        Fmt::U32 => Value::U32(codec::read_le_u32(input)?),
        Fmt::I16 => Value::I16(codec::read_le_i16(input)?),
        Fmt::F32 => Value::F32(codec::read_le_f32(input)?),
        Fmt::Bool => Value::Bool(codec::read_le_u8(input)? != 0),
        Fmt::Str(n) => Value::Str(codec::read_fixed_string(input, n, def.name)?),
        Fmt::Skip(n) => {
            codec::read_bytes(input, n, def.name)?;
            Value::Skipped
        }
        Fmt::Version => Value::Spec(codec::read_filespec(input)?),
        Fmt::TimeOrigin => Value::Time(codec::read_time_origin(input)?),
    };
    apply_post(def.post, raw, def.name)
}

fn apply_post(post: Post, raw: Value, name: &'static str) -> Result<Value, NevNsxError> {
    match (post, raw) {
        (Post::None, raw) => Ok(raw),
        (Post::Freq, Value::U32(v)) => Ok(Value::Freq(codec::millihertz_to_hz(v))),
        (Post::Filter, Value::U16(v)) => Ok(Value::Filter(FilterType::from_u16(v)?)),
        (Post::DigMode, Value::Bool(v)) => Ok(Value::DigMode(DigitalMode::from_u8(v as u8))),
        (Post::DigConfig, Value::U8(v)) => Ok(Value::DigConfig(DigitalConfig::from_u8(v))),
        (Post::AnaConfig, Value::U8(v)) => Ok(Value::AnaConfig(AnalogConfig::from_u8(v))),
        (Post::TrackObj, Value::U16(v)) => Ok(Value::TrackObj(TrackingObjectType::from_u16(v))),
        _ => Err(NevNsxError::FieldAccess(name)),
    }
}

/// NEV basic header, 336 bytes including the 8-byte magic.
pub const NEV_BASIC: &[FieldDef] = &[
    field("FileTypeID", Fmt::Str(8)),
    field("FileSpec", Fmt::Version),
    field("AddFlags", Fmt::U16),
    field("BytesInHeader", Fmt::U32),
    field("BytesInDataPackets", Fmt::U32),
    field("TimeStampResolution", Fmt::U32),
    field("SampleTimeResolution", Fmt::U32),
    field("TimeOrigin", Fmt::TimeOrigin),
    field("CreatingApplication", Fmt::Str(32)),
    field("Comment", Fmt::Str(256)),
    field("NumExtendedHeaders", Fmt::U32),
];

/// NEV extended header bodies, 24 bytes each after the 8-byte tag.
pub const ARRAYNME: &[FieldDef] = &[field("ArrayName", Fmt::Str(24))];
pub const ECOMMENT: &[FieldDef] = &[field("ExtraComment", Fmt::Str(24))];
pub const CCOMMENT: &[FieldDef] = &[field("ContComment", Fmt::Str(24))];
pub const MAPFILE: &[FieldDef] = &[field("MapFile", Fmt::Str(24))];

pub const NEUEVWAV: &[FieldDef] = &[
    field("ElectrodeID", Fmt::U16),
    field("PhysicalConnector", Fmt::U8),
    field("ConnectorPin", Fmt::U8),
    field("DigitizationFactor", Fmt::U16),
    field("EnergyThreshold", Fmt::U16),
    field("HighThreshold", Fmt::I16),
    field("LowThreshold", Fmt::I16),
    field("NumSortedUnits", Fmt::U8),
    field("BytesPerWaveform", Fmt::U8),
    field("SpikeWidthSamples", Fmt::U16),
    field("EmptyBytes", Fmt::Skip(8)),
];

pub const NEUEVLBL: &[FieldDef] = &[
    field("ElectrodeID", Fmt::U16),
    field("Label", Fmt::Str(16)),
    field("EmptyBytes", Fmt::Skip(6)),
];

pub const NEUEVFLT: &[FieldDef] = &[
    field("ElectrodeID", Fmt::U16),
    field_with("HighFreqCorner", Fmt::U32, Post::Freq),
    field("HighFreqOrder", Fmt::U32),
    field_with("HighFreqType", Fmt::U16, Post::Filter),
    field_with("LowFreqCorner", Fmt::U32, Post::Freq),
    field("LowFreqOrder", Fmt::U32),
    field_with("LowFreqType", Fmt::U16, Post::Filter),
    field("EmptyBytes", Fmt::Skip(2)),
];

pub const DIGLABEL: &[FieldDef] = &[
    field("Label", Fmt::Str(16)),
    field_with("Mode", Fmt::Bool, Post::DigMode),
    field("EmptyBytes", Fmt::Skip(7)),
];

pub const NSASEXEV: &[FieldDef] = &[
    field("Frequency", Fmt::U16),
    field_with("DigitalInputConfig", Fmt::U8, Post::DigConfig),
    field_with("AnalogCh1Config", Fmt::U8, Post::AnaConfig),
    field("AnalogCh1DetectVal", Fmt::I16),
    field_with("AnalogCh2Config", Fmt::U8, Post::AnaConfig),
    field("AnalogCh2DetectVal", Fmt::I16),
    field_with("AnalogCh3Config", Fmt::U8, Post::AnaConfig),
    field("AnalogCh3DetectVal", Fmt::I16),
    field_with("AnalogCh4Config", Fmt::U8, Post::AnaConfig),
    field("AnalogCh4DetectVal", Fmt::I16),
    field_with("AnalogCh5Config", Fmt::U8, Post::AnaConfig),
    field("AnalogCh5DetectVal", Fmt::I16),
    field("EmptyBytes", Fmt::Skip(6)),
];

pub const VIDEOSYN: &[FieldDef] = &[
    field("VideoSourceID", Fmt::U16),
    field("VideoSource", Fmt::Str(16)),
    field("FrameRate", Fmt::F32),
    field("EmptyBytes", Fmt::Skip(2)),
];

pub const TRACKOBJ: &[FieldDef] = &[
    field_with("TrackableType", Fmt::U16, Post::TrackObj),
    field("TrackableID", Fmt::U32),
    field("VideoSource", Fmt::Str(16)),
    field("EmptyBytes", Fmt::Skip(2)),
];

/// Legacy NSx basic header body after the 8-byte `NEURALSG` magic.
pub const NSX_BASIC_21: &[FieldDef] = &[
    field("Label", Fmt::Str(16)),
    field("Period", Fmt::U32),
    field("ChannelCount", Fmt::U32),
];

/// Modern NSx basic header body after the 8-byte `NEURALCD` magic,
/// 306 bytes.
pub const NSX_BASIC: &[FieldDef] = &[
    field("FileSpec", Fmt::Version),
    field("BytesInHeader", Fmt::U32),
    field("Label", Fmt::Str(16)),
    field("Comment", Fmt::Str(256)),
    field("Period", Fmt::U32),
    field("TimeStampResolution", Fmt::U32),
    field("TimeOrigin", Fmt::TimeOrigin),
    field("ChannelCount", Fmt::U32),
];

/// NSx per-channel extended header, 66 bytes.
pub const NSX_EXTENDED: &[FieldDef] = &[
    field("Type", Fmt::Str(2)),
    field("ElectrodeID", Fmt::U16),
    field("ElectrodeLabel", Fmt::Str(16)),
    field("PhysicalConnector", Fmt::U8),
    field("ConnectorPin", Fmt::U8),
    field("MinDigitalValue", Fmt::I16),
    field("MaxDigitalValue", Fmt::I16),
    field("MinAnalogValue", Fmt::I16),
    field("MaxAnalogValue", Fmt::I16),
    field("Units", Fmt::Str(16)),
    field_with("HighFreqCorner", Fmt::U32, Post::Freq),
    field("HighFreqOrder", Fmt::U32),
    field_with("HighFreqType", Fmt::U16, Post::Filter),
    field_with("LowFreqCorner", Fmt::U32, Post::Freq),
    field("LowFreqOrder", Fmt::U32),
    field_with("LowFreqType", Fmt::U16, Post::Filter),
];

/// Body table for a NEV extended header tag, or `UnknownHeaderKind`.
pub fn nev_extended_table(tag: &str) -> Result<&'static [FieldDef], NevNsxError> {
    match tag {
        "ARRAYNME" => Ok(ARRAYNME),
        "ECOMMENT" => Ok(ECOMMENT),
        "CCOMMENT" => Ok(CCOMMENT),
        "MAPFILE" => Ok(MAPFILE),
        "NEUEVWAV" => Ok(NEUEVWAV),
        "NEUEVLBL" => Ok(NEUEVLBL),
        "NEUEVFLT" => Ok(NEUEVFLT),
        "DIGLABEL" => Ok(DIGLABEL),
        "NSASEXEV" => Ok(NSASEXEV),
        "VIDEOSYN" => Ok(VIDEOSYN),
        "TRACKOBJ" => Ok(TRACKOBJ),
        _ => Err(NevNsxError::UnknownHeaderKind(tag.to_string())),
    }
}
