//! NSx continuous file decoder.
//!
//! An NSx file is a basic header (legacy `NEURALSG` or modern
//! `NEURALCD`), one extended header per analog channel for modern
//! revisions, then one or more time-contiguous segments of interleaved
//! 16-bit samples. Segments are discovered once at open; extraction is
//! windowed and reads sample columns straight out of the memory map.

use byteorder::{LittleEndian, WriteBytesExt};
use log::{info, warn};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::codec;
use crate::codec::FilterType;
use crate::filespec::{FileRevision, FileSpec};
use crate::nevnsx_error::NevNsxError;
use crate::schema;
use crate::view::{SampleMatrix, StridedView};

/// Nominal acquisition sample resolution, samples per second.
pub const SAMPLE_RESOLUTION: f64 = 30_000.0;

/// Fixed unit conversion for legacy spec 2.1 files, microvolts per bit.
pub const UV_PER_BIT_LEGACY: f64 = 0.25;

pub(crate) const DATA_BYTE_SIZE: usize = 2;
pub(crate) const LEGACY_BASIC_BYTES: u32 = 32;
pub(crate) const MODERN_BASIC_BYTES: u32 = 314;
pub(crate) const EXT_HEADER_BYTES: u32 = 66;

/// NSx basic header. Legacy files carry only label, period and channel
/// ids; the remaining fields are synthesized at open.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NsxBasicHeader {
    pub file_type_id: String,
    pub file_spec: FileSpec,
    pub bytes_in_header: u32,
    pub label: String,
    pub comment: String,
    /// Timestamp ticks per sample.
    pub period: u32,
    /// Timestamp ticks per second.
    pub timestamp_resolution: u32,
    pub time_origin: chrono::NaiveDateTime,
    pub channel_count: u32,
    /// Channel id array, present only for legacy files.
    pub channel_ids: Vec<u32>,
}

impl NsxBasicHeader {
    /// Re-encode the modern 314-byte basic header.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), NevNsxError> {
        codec::write_fixed_string(out, &self.file_type_id, 8)?;
        out.write_all(&[self.file_spec.major, self.file_spec.minor])?;
        out.write_u32::<LittleEndian>(self.bytes_in_header)?;
        codec::write_fixed_string(out, &self.label, 16)?;
        codec::write_fixed_string(out, &self.comment, 256)?;
        out.write_u32::<LittleEndian>(self.period)?;
        out.write_u32::<LittleEndian>(self.timestamp_resolution)?;
        codec::write_time_origin(out, &self.time_origin)?;
        out.write_u32::<LittleEndian>(self.channel_count)?;
        Ok(())
    }
}

impl fmt::Display for NsxBasicHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} file spec {}", self.file_type_id, self.file_spec)?;
        writeln!(f, "                label: {}", self.label)?;
        writeln!(f, "               period: {} ticks/sample", self.period)?;
        writeln!(f, " timestamp resolution: {}", self.timestamp_resolution)?;
        write!(f, "             channels: {}", self.channel_count)
    }
}

/// One 66-byte per-channel extended header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NsxChannelHeader {
    pub electrode_id: u16,
    pub electrode_label: String,
    /// Bank number; 1-4 are front-end banks, 5 and up are analog inputs.
    pub physical_connector: u8,
    pub connector_pin: u8,
    pub min_digital_value: i16,
    pub max_digital_value: i16,
    pub min_analog_value: i16,
    pub max_analog_value: i16,
    pub units: String,
    pub high_freq_corner_hz: f64,
    pub high_freq_order: u32,
    pub high_freq_type: FilterType,
    pub low_freq_corner_hz: f64,
    pub low_freq_order: u32,
    pub low_freq_type: FilterType,
}

impl NsxChannelHeader {
    fn from_fields(fields: &schema::HeaderFields) -> Result<NsxChannelHeader, NevNsxError> {
        let header_type = fields.string("Type")?;
        if header_type != "CC" {
            return Err(NevNsxError::UnknownHeaderKind(header_type));
        }
        let header = NsxChannelHeader {
            electrode_id: fields.u16("ElectrodeID")?,
            electrode_label: fields.string("ElectrodeLabel")?,
            physical_connector: fields.u8("PhysicalConnector")?,
            connector_pin: fields.u8("ConnectorPin")?,
            min_digital_value: fields.i16("MinDigitalValue")?,
            max_digital_value: fields.i16("MaxDigitalValue")?,
            min_analog_value: fields.i16("MinAnalogValue")?,
            max_analog_value: fields.i16("MaxAnalogValue")?,
            units: fields.string("Units")?,
            high_freq_corner_hz: fields.freq("HighFreqCorner")?,
            high_freq_order: fields.u32("HighFreqOrder")?,
            high_freq_type: fields.filter("HighFreqType")?,
            low_freq_corner_hz: fields.freq("LowFreqCorner")?,
            low_freq_order: fields.u32("LowFreqOrder")?,
            low_freq_type: fields.filter("LowFreqType")?,
        };
        if header.max_digital_value <= header.min_digital_value {
            return Err(NevNsxError::InvariantViolation(format!(
                "channel {}: MaxDigitalValue {} <= MinDigitalValue {}",
                header.electrode_id, header.max_digital_value, header.min_digital_value
            )));
        }
        if header.max_analog_value <= header.min_analog_value {
            return Err(NevNsxError::InvariantViolation(format!(
                "channel {}: MaxAnalogValue {} <= MinAnalogValue {}",
                header.electrode_id, header.max_analog_value, header.min_analog_value
            )));
        }
        Ok(header)
    }

    /// Re-encode the 66-byte extended header.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), NevNsxError> {
        codec::write_fixed_string(out, "CC", 2)?;
        out.write_u16::<LittleEndian>(self.electrode_id)?;
        codec::write_fixed_string(out, &self.electrode_label, 16)?;
        out.write_all(&[self.physical_connector, self.connector_pin])?;
        out.write_i16::<LittleEndian>(self.min_digital_value)?;
        out.write_i16::<LittleEndian>(self.max_digital_value)?;
        out.write_i16::<LittleEndian>(self.min_analog_value)?;
        out.write_i16::<LittleEndian>(self.max_analog_value)?;
        codec::write_fixed_string(out, &self.units, 16)?;
        out.write_u32::<LittleEndian>(codec::hz_to_millihertz(self.high_freq_corner_hz))?;
        out.write_u32::<LittleEndian>(self.high_freq_order)?;
        out.write_u16::<LittleEndian>(self.high_freq_type.value())?;
        out.write_u32::<LittleEndian>(codec::hz_to_millihertz(self.low_freq_corner_hz))?;
        out.write_u32::<LittleEndian>(self.low_freq_order)?;
        out.write_u16::<LittleEndian>(self.low_freq_type.value())?;
        Ok(())
    }

    /// Analog units per digital bit for this channel.
    pub fn digital_to_analog_scale(&self) -> f64 {
        (self.max_analog_value as f64 - self.min_analog_value as f64)
            / (self.max_digital_value as f64 - self.min_digital_value as f64)
    }

    pub fn is_front_end(&self) -> bool {
        (1..=4).contains(&self.physical_connector)
    }

    pub fn is_analog_input(&self) -> bool {
        self.physical_connector >= 5
    }
}

/// A run of consecutive samples with a known start time, discovered at
/// open. PTP segments keep one timestamp per sample on disk; the view
/// stride skips the per-record headers.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub first_timestamp: u64,
    pub num_samples: usize,
    pub byte_offset_to_data: usize,
    /// Distance in bytes between consecutive sample rows.
    pub(crate) row_stride: usize,
}

/// Extraction parameters for `NsxFile::get_data`. Out-of-range values
/// are coerced to their defaults with a warning rather than rejected.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Channel allow-list; `None` keeps every channel.
    pub elec_ids: Option<Vec<u16>>,
    pub start_time_s: f64,
    /// Window length in seconds; `None` reads to the end.
    pub data_time_s: Option<f64>,
    /// Naive decimation factor. Deprecated; performs no anti-aliasing.
    pub downsample: usize,
    /// Prepend zero samples so the first segment starts at time zero.
    pub zeropad: bool,
    /// Keep the whole per-sample timestamp vector instead of only the
    /// first element.
    pub full_timestamps: bool,
    /// Return `(channels, samples)` arrays instead of
    /// `(samples, channels)`.
    pub elec_rows: bool,
    /// Force each PTP segment to the sample count its elapsed time
    /// implies.
    pub force_srate: bool,
}

impl Default for ExtractOptions {
    fn default() -> ExtractOptions {
        ExtractOptions {
            elec_ids: None,
            start_time_s: 0.0,
            data_time_s: None,
            downsample: 1,
            zeropad: false,
            full_timestamps: false,
            elec_rows: true,
            force_srate: false,
        }
    }
}

/// Per-segment extraction result metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// All sample timestamps when `full_timestamps` was set, otherwise
    /// just the first.
    pub timestamps: Vec<u64>,
    pub num_data_points: usize,
    pub data_time_s: f64,
}

/// Extraction result: one matrix and one info entry per surviving
/// segment.
#[derive(Debug, Clone)]
pub struct NsxData {
    pub elec_ids: Vec<u16>,
    pub start_time_s: f64,
    pub data_time_s: Option<f64>,
    pub downsample: usize,
    pub samp_per_s: f64,
    pub headers: Vec<SegmentInfo>,
    pub data: Vec<SampleMatrix>,
}

/// An open NSx file. Headers and segment metadata are parsed eagerly;
/// sample data stays memory mapped until extracted.
pub struct NsxFile {
    pub(crate) path: PathBuf,
    #[allow(dead_code)]
    pub(crate) file: File,
    pub(crate) mmap: Mmap,
    pub basic_header: NsxBasicHeader,
    pub extended_headers: Vec<NsxChannelHeader>,
    pub segments: Vec<Segment>,
    pub(crate) revision: FileRevision,
}

impl NsxFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<NsxFile, NevNsxError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let mut input = &mmap[..];
        let magic = codec::read_fixed_string(&mut input, 8, "FileTypeID")?;
        let (basic_header, extended_headers, revision) = match magic.as_str() {
            "NEURALSG" => {
                let fields = schema::decode(schema::NSX_BASIC_21, &mut input)?;
                let channel_count = fields.u32("ChannelCount")?;
                let mut channel_ids = Vec::with_capacity(channel_count as usize);
                for _ in 0..channel_count {
                    channel_ids.push(codec::read_le_u32(&mut input)?);
                }
                let header = NsxBasicHeader {
                    file_type_id: magic,
                    file_spec: FileSpec::new(2, 1),
                    bytes_in_header: LEGACY_BASIC_BYTES + 4 * channel_count,
                    label: fields.string("Label")?,
                    comment: String::new(),
                    period: fields.u32("Period")?,
                    timestamp_resolution: SAMPLE_RESOLUTION as u32,
                    time_origin: codec::epoch(),
                    channel_count,
                    channel_ids,
                };
                (header, Vec::new(), FileRevision::Legacy21)
            }
            "NEURALCD" => {
                let fields = schema::decode(schema::NSX_BASIC, &mut input)?;
                let file_spec = fields.spec("FileSpec")?;
                let revision = FileRevision::from_spec(file_spec)?;
                let channel_count = fields.u32("ChannelCount")?;
                let mut extended_headers = Vec::with_capacity(channel_count as usize);
                for _ in 0..channel_count {
                    let ext = schema::decode(schema::NSX_EXTENDED, &mut input)?;
                    extended_headers.push(NsxChannelHeader::from_fields(&ext)?);
                }
                let header = NsxBasicHeader {
                    file_type_id: magic,
                    file_spec,
                    bytes_in_header: fields.u32("BytesInHeader")?,
                    label: fields.string("Label")?,
                    comment: fields.string("Comment")?,
                    period: fields.u32("Period")?,
                    timestamp_resolution: fields.u32("TimeStampResolution")?,
                    time_origin: fields.time("TimeOrigin")?,
                    channel_count,
                    channel_ids: Vec::new(),
                };
                (header, extended_headers, revision)
            }
            _ => return Err(NevNsxError::UnknownFileType(magic)),
        };

        if basic_header.period == 0 {
            return Err(NevNsxError::InvariantViolation(
                "Period must be nonzero".to_string(),
            ));
        }
        if basic_header.channel_count == 0 {
            return Err(NevNsxError::InvariantViolation(
                "ChannelCount must be nonzero".to_string(),
            ));
        }
        if basic_header.bytes_in_header as usize > mmap.len() {
            return Err(NevNsxError::UnexpectedEof(
                basic_header.bytes_in_header as usize - mmap.len(),
                "NSx header block",
            ));
        }

        let mut nsx = NsxFile {
            path,
            file,
            mmap,
            basic_header,
            extended_headers,
            segments: Vec::new(),
            revision,
        };
        nsx.segments = nsx.discover_segments()?;
        Ok(nsx)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn revision(&self) -> FileRevision {
        self.revision
    }

    /// Output samples per second.
    pub fn samp_per_s(&self) -> f64 {
        SAMPLE_RESOLUTION / self.basic_header.period as f64
    }

    /// Timestamp ticks between adjacent samples of a segment.
    pub fn clk_per_samp(&self) -> f64 {
        self.basic_header.period as f64 * self.basic_header.timestamp_resolution as f64
            / SAMPLE_RESOLUTION
    }

    /// Electrode ids in file order.
    pub fn elec_ids(&self) -> Vec<u16> {
        if self.revision == FileRevision::Legacy21 {
            self.basic_header
                .channel_ids
                .iter()
                .map(|&id| id as u16)
                .collect()
        } else {
            self.extended_headers
                .iter()
                .map(|h| h.electrode_id)
                .collect()
        }
    }

    fn discover_segments(&mut self) -> Result<Vec<Segment>, NevNsxError> {
        let bih = self.basic_header.bytes_in_header as usize;
        let cc = self.basic_header.channel_count as usize;
        let len = self.mmap.len();
        let row = DATA_BYTE_SIZE * cc;

        if self.revision == FileRevision::Legacy21 {
            let num_samples = (len - bih) / row;
            if num_samples == 0 {
                return Ok(Vec::new());
            }
            return Ok(vec![Segment {
                first_timestamp: 0,
                num_samples,
                byte_offset_to_data: bih,
                row_stride: row,
            }]);
        }

        // 3.x files from newer firmware stamp every sample: scan once as
        // fixed records and check that every packet holds one sample.
        if self.revision == FileRevision::V30 {
            let rec = 1 + 8 + 4 + row;
            let nrec = (len - bih) / rec;
            if nrec > 0 {
                let ndp = StridedView::<u32>::new(&self.mmap[bih..], 9, rec, nrec)?;
                if (0..nrec).all(|i| ndp.get(i) == 1) {
                    self.revision = FileRevision::V3xPtp;
                    return self.discover_ptp_segments(bih, rec, nrec);
                }
            }
        }

        // One multi-sample packet per segment.
        let ts_size = self.revision.timestamp_size();
        let hdr = 1 + ts_size + 4;
        let mut segments = Vec::new();
        let mut pos = bih;
        while pos < len {
            if pos + hdr > len {
                return Err(NevNsxError::UnexpectedEof(
                    pos + hdr - len,
                    "segment packet header",
                ));
            }
            if self.mmap[pos] != 0x01 {
                return Err(NevNsxError::InvariantViolation(format!(
                    "segment header at offset {} lacks the reserved 0x01 byte",
                    pos
                )));
            }
            let mut head = &self.mmap[pos + 1..pos + hdr];
            let first_timestamp = if ts_size == 8 {
                codec::read_le_u64(&mut head)?
            } else {
                codec::read_le_u32(&mut head)? as u64
            };
            let num_samples = codec::read_le_u32(&mut head)? as usize;
            let data_off = pos + hdr;
            let data_bytes = num_samples * row;
            if data_off + data_bytes > len {
                return Err(NevNsxError::UnexpectedEof(
                    data_off + data_bytes - len,
                    "segment sample data",
                ));
            }
            if num_samples == 0 {
                warn!("skipping empty data packet at offset {}", pos);
                pos = data_off;
                continue;
            }
            segments.push(Segment {
                first_timestamp,
                num_samples,
                byte_offset_to_data: data_off,
                row_stride: row,
            });
            pos = data_off + data_bytes;
        }
        Ok(segments)
    }

    /// Reconstruct logical segments from a one-sample-per-packet PTP
    /// stream: a gap of more than two sample periods starts a new
    /// segment.
    fn discover_ptp_segments(
        &self,
        bih: usize,
        rec: usize,
        nrec: usize,
    ) -> Result<Vec<Segment>, NevNsxError> {
        let ts = StridedView::<u64>::new(&self.mmap[bih..], 1, rec, nrec)?;
        let seg_threshold_clk = 2.0 * self.clk_per_samp();
        let mut segments = Vec::new();
        let mut start = 0usize;
        for i in 1..nrec {
            let delta = ts.get(i).saturating_sub(ts.get(i - 1)) as f64;
            if delta > seg_threshold_clk {
                segments.push(self.ptp_segment(bih, rec, &ts, start, i));
                start = i;
            }
        }
        segments.push(self.ptp_segment(bih, rec, &ts, start, nrec));
        Ok(segments)
    }

    fn ptp_segment(
        &self,
        bih: usize,
        rec: usize,
        ts: &StridedView<u64>,
        start: usize,
        stop: usize,
    ) -> Segment {
        Segment {
            first_timestamp: ts.get(start),
            num_samples: stop - start,
            byte_offset_to_data: bih + start * rec + 13,
            row_stride: rec,
        }
    }

    /// Per-sample timestamp vector for one segment: the arithmetic
    /// progression `first + i * clk_per_samp`, or the verbatim PTP
    /// stamps.
    pub fn segment_timestamps(&self, seg: &Segment) -> Result<Vec<u64>, NevNsxError> {
        if self.revision.is_ptp() {
            let view = StridedView::<u64>::new(
                &self.mmap,
                seg.byte_offset_to_data - 12,
                seg.row_stride,
                seg.num_samples,
            )?;
            Ok(view.to_vec())
        } else {
            let clk = self.clk_per_samp();
            Ok((0..seg.num_samples)
                .map(|i| seg.first_timestamp + (clk * i as f64) as u64)
                .collect())
        }
    }

    /// Resolve a channel allow-list against this file: the kept ids
    /// (sorted) and their column indices in file order. `None` means no
    /// requested channel exists.
    pub(crate) fn resolve_channels(
        &self,
        elec_ids: Option<&[u16]>,
    ) -> Option<(Vec<u16>, Vec<usize>)> {
        let avail = self.elec_ids();
        match elec_ids {
            None => {
                let cols = (0..avail.len()).collect();
                Some((avail, cols))
            }
            Some(ids) => {
                let mut sel: Vec<u16> = Vec::new();
                let mut unknown: Vec<u16> = Vec::new();
                for &id in ids {
                    if avail.contains(&id) {
                        if !sel.contains(&id) {
                            sel.push(id);
                        }
                    } else if !unknown.contains(&id) {
                        unknown.push(id);
                    }
                }
                if !unknown.is_empty() {
                    warn!("channels {:?} do not exist in the data", unknown);
                }
                if sel.is_empty() {
                    return None;
                }
                sel.sort_unstable();
                let cols = sel
                    .iter()
                    .map(|id| avail.iter().position(|a| a == id).unwrap())
                    .collect();
                Some((sel, cols))
            }
        }
    }

    fn sanitize(&self, opts: &ExtractOptions) -> ExtractOptions {
        let mut opts = opts.clone();
        if !opts.start_time_s.is_finite() || opts.start_time_s < 0.0 {
            warn!("start time is not valid, using 0");
            opts.start_time_s = 0.0;
        }
        if let Some(d) = opts.data_time_s {
            if !d.is_finite() || d < 0.0 {
                warn!("data time is not valid, returning all data");
                opts.data_time_s = None;
            }
        }
        if opts.downsample < 1 {
            warn!("downsample must be a positive integer, using 1");
            opts.downsample = 1;
        }
        if opts.downsample > 1 {
            warn!("downsample is deprecated and performs no anti-aliasing");
        }
        if opts.zeropad && self.revision.is_ptp() {
            warn!("zeropad does not apply to PTP-timestamped data, ignoring");
            opts.zeropad = false;
        }
        if opts.force_srate && !self.revision.is_ptp() {
            warn!("force_srate only applies to PTP-timestamped data, ignoring");
            opts.force_srate = false;
        }
        opts
    }

    /// Windowed extraction over the discovered segments.
    pub fn get_data(&self, opts: &ExtractOptions) -> Result<NsxData, NevNsxError> {
        let opts = self.sanitize(opts);
        let samp_per_s = self.samp_per_s();
        let clk = self.clk_per_samp();
        let resolution = self.basic_header.timestamp_resolution as f64;

        let mut output = NsxData {
            elec_ids: Vec::new(),
            start_time_s: opts.start_time_s,
            data_time_s: opts.data_time_s,
            downsample: opts.downsample,
            samp_per_s,
            headers: Vec::new(),
            data: Vec::new(),
        };

        let (sel_ids, cols) = match self.resolve_channels(opts.elec_ids.as_deref()) {
            Some(sel) => sel,
            None => {
                warn!("none of the requested electrodes exist in the data");
                return Ok(output);
            }
        };
        output.elec_ids = sel_ids;

        if self.segments.is_empty() {
            return Ok(output);
        }

        let ts0 = self.segments[0].first_timestamp as f64;
        let test_start = ts0 + opts.start_time_s * resolution;
        let test_stop = opts.data_time_s.map(|d| test_start + d * resolution);

        let mut first_kept = true;
        for seg in &self.segments {
            let ts = self.segment_timestamps(seg)?;
            let first = ts[0] as f64;
            let last = ts[ts.len() - 1] as f64;

            // Drop segments wholly outside the window.
            if opts.start_time_s > 0.0 && last < test_start {
                continue;
            }
            if let Some(stop) = test_stop {
                if first > stop {
                    continue;
                }
            }

            // Mask samples against the window bounds.
            let i0 = if opts.start_time_s > 0.0 && first < test_start {
                ts.partition_point(|&t| (t as f64) < test_start)
            } else {
                0
            };
            let i1 = match test_stop {
                Some(stop) if last > stop => ts.partition_point(|&t| t as f64 <= stop),
                _ => ts.len(),
            };
            if i0 >= i1 {
                continue;
            }

            let mut ts = ts[i0..i1].to_vec();
            let mut data = self.read_rows(seg, i0, i1, &cols)?;

            if first_kept && opts.zeropad && ts[0] != 0 {
                let padsize = (ts[0] as f64 / clk).ceil() as usize;
                let mut padded = SampleMatrix::zeroed(padsize + data.rows(), data.cols())?;
                for row in 0..data.rows() {
                    for col in 0..data.cols() {
                        padded.set(padsize + row, col, data.get(row, col));
                    }
                }
                let mut pad_ts: Vec<u64> = (1..=padsize)
                    .map(|k| ts[0].saturating_sub((clk * k as f64) as u64))
                    .collect();
                pad_ts.reverse();
                pad_ts.extend_from_slice(&ts);
                ts = pad_ts;
                data = padded;
            }
            first_kept = false;

            if opts.force_srate {
                force_sample_rate(&mut data, &mut ts, clk)?;
            }

            if opts.downsample > 1 {
                data = decimate(&data, opts.downsample)?;
                ts = ts.iter().copied().step_by(opts.downsample).collect();
            }

            let num_data_points = data.rows();
            if !opts.full_timestamps {
                ts.truncate(1);
            }
            output.headers.push(SegmentInfo {
                timestamps: ts,
                num_data_points,
                data_time_s: num_data_points as f64 / samp_per_s,
            });
            output.data.push(if opts.elec_rows {
                data.transposed()?
            } else {
                data
            });
        }
        Ok(output)
    }

    /// Copy sample rows `i0..i1` of one segment, restricted to the
    /// given column indices.
    fn read_rows(
        &self,
        seg: &Segment,
        i0: usize,
        i1: usize,
        cols: &[usize],
    ) -> Result<SampleMatrix, NevNsxError> {
        let rows = i1 - i0;
        let mut out = SampleMatrix::zeroed(rows, cols.len())?;
        for (out_col, &col) in cols.iter().enumerate() {
            let view = StridedView::<i16>::new(
                &self.mmap,
                seg.byte_offset_to_data + i0 * seg.row_stride + DATA_BYTE_SIZE * col,
                seg.row_stride,
                rows,
            )?;
            for row in 0..rows {
                out.set(row, out_col, view.get(row));
            }
        }
        Ok(out)
    }

    /// Release the backing file. Dropping the value has the same
    /// effect; this form logs the release.
    pub fn close(self) {
        info!("{} closed", self.path.display());
    }
}

impl fmt::Display for NsxFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} segments)",
            self.path.display(),
            self.basic_header,
            self.segments.len()
        )
    }
}

/// Insert or delete rows so the segment holds exactly the sample count
/// its elapsed time implies, then replace the timestamps with the ideal
/// arithmetic progression.
fn force_sample_rate(
    data: &mut SampleMatrix,
    ts: &mut Vec<u64>,
    clk: f64,
) -> Result<(), NevNsxError> {
    let npoints = data.rows();
    if npoints == 0 {
        return Ok(());
    }
    let seg_clks = (ts[npoints - 1] - ts[0]) as f64 + clk;
    let n_expected = seg_clks / clk;
    let n_insert = (n_expected - npoints as f64).round() as i64;
    if n_insert != 0 {
        let count = n_insert.unsigned_abs() as usize;
        let positions: Vec<usize> = (1..=count).map(|i| i * npoints / (count + 1)).collect();
        if n_insert > 0 {
            let mut out = SampleMatrix::zeroed(npoints + count, data.cols())?;
            let mut out_row = 0;
            let mut next = 0;
            for row in 0..npoints {
                while next < count && positions[next] == row {
                    let pair = (row + 1).min(npoints - 1);
                    for col in 0..data.cols() {
                        let mid =
                            ((data.get(row, col) as i32 + data.get(pair, col) as i32) / 2) as i16;
                        out.set(out_row, col, mid);
                    }
                    out_row += 1;
                    next += 1;
                }
                for col in 0..data.cols() {
                    out.set(out_row, col, data.get(row, col));
                }
                out_row += 1;
            }
            *data = out;
        } else {
            let mut drop = vec![false; npoints];
            for &p in &positions {
                drop[p] = true;
            }
            let kept = drop.iter().filter(|&&d| !d).count();
            let mut out = SampleMatrix::zeroed(kept, data.cols())?;
            let mut out_row = 0;
            for row in 0..npoints {
                if drop[row] {
                    continue;
                }
                for col in 0..data.cols() {
                    out.set(out_row, col, data.get(row, col));
                }
                out_row += 1;
            }
            *data = out;
        }
    }
    let first = ts[0];
    *ts = (0..data.rows())
        .map(|i| first + (clk * i as f64) as u64)
        .collect();
    Ok(())
}

/// Naive decimation: every n-th row, no anti-aliasing.
fn decimate(data: &SampleMatrix, step: usize) -> Result<SampleMatrix, NevNsxError> {
    let rows = data.rows().div_ceil(step);
    let mut out = SampleMatrix::zeroed(rows, data.cols())?;
    for (out_row, row) in (0..data.rows()).step_by(step).enumerate() {
        for col in 0..data.cols() {
            out.set(out_row, col, data.get(row, col));
        }
    }
    Ok(out)
}
