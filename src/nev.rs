//! NEV event file decoder.
//!
//! A NEV file is one 336-byte basic header, a run of 32-byte extended
//! headers, then a stream of fixed-width event packets. `get_data`
//! reinterprets the packet stream as strided views keyed by the packet
//! discriminant and materializes one typed struct per packet class.

use log::info;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::codec::{latin1_string, DigitalConfig, DigitalMode, FilterType, TrackingObjectType};
use crate::filespec::{FileRevision, FileSpec};
use crate::nevnsx_error::NevNsxError;
use crate::schema::{self, HeaderFields};
use crate::view::{SampleMatrix, StridedView};

pub const DIGITAL_PACKET_ID: u16 = 0;
pub const NEURAL_PACKET_ID_MIN: u16 = 1;
pub const NEURAL_PACKET_ID_MAX: u16 = 16384;
pub const CONFIGURATION_PACKET_ID: u16 = 65531;
pub const BUTTON_PACKET_ID: u16 = 65532;
pub const TRACKING_PACKET_ID: u16 = 65533;
pub const VIDEO_SYNC_PACKET_ID: u16 = 65534;
pub const COMMENT_PACKET_ID: u16 = 65535;

/// `CharSet` sentinel marking a comment packet as a region-of-interest
/// event rather than text.
pub const CHARSET_ROI: u8 = 255;

/// Waveform width fixed at 48 samples for file specs before 2.3.
pub const WAVEFORM_SAMPLES_LEGACY: u16 = 48;

/// The 336-byte NEV basic header.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NevBasicHeader {
    pub file_type_id: String,
    pub file_spec: FileSpec,
    pub add_flags: u16,
    pub bytes_in_header: u32,
    pub bytes_in_data_packets: u32,
    pub timestamp_resolution: u32,
    pub sample_time_resolution: u32,
    pub time_origin: chrono::NaiveDateTime,
    pub creating_application: String,
    pub comment: String,
    pub num_extended_headers: u32,
}

impl NevBasicHeader {
    fn from_fields(fields: &HeaderFields) -> Result<NevBasicHeader, NevNsxError> {
        let header = NevBasicHeader {
            file_type_id: fields.string("FileTypeID")?,
            file_spec: fields.spec("FileSpec")?,
            add_flags: fields.u16("AddFlags")?,
            bytes_in_header: fields.u32("BytesInHeader")?,
            bytes_in_data_packets: fields.u32("BytesInDataPackets")?,
            timestamp_resolution: fields.u32("TimeStampResolution")?,
            sample_time_resolution: fields.u32("SampleTimeResolution")?,
            time_origin: fields.time("TimeOrigin")?,
            creating_application: fields.string("CreatingApplication")?,
            comment: fields.string("Comment")?,
            num_extended_headers: fields.u32("NumExtendedHeaders")?,
        };
        if header.file_type_id != "NEURALEV" && header.file_type_id != "BREVENTS" {
            return Err(NevNsxError::UnknownFileType(header.file_type_id));
        }
        FileRevision::from_spec(header.file_spec)?;
        let min_packet = header.timestamp_size() as u32 + 4;
        if header.bytes_in_data_packets < min_packet {
            return Err(NevNsxError::InvariantViolation(format!(
                "BytesInDataPackets {} below minimum {}",
                header.bytes_in_data_packets, min_packet
            )));
        }
        Ok(header)
    }

    /// Event timestamps are 8 bytes wide for `BREVENTS` files, 4 otherwise.
    pub fn timestamp_size(&self) -> usize {
        if self.file_type_id == "BREVENTS" {
            8
        } else {
            4
        }
    }
}

impl fmt::Display for NevBasicHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} file spec {}", self.file_type_id, self.file_spec)?;
        writeln!(f, "          time origin: {}", self.time_origin)?;
        writeln!(f, " timestamp resolution: {}", self.timestamp_resolution)?;
        writeln!(f, "    bytes in a packet: {}", self.bytes_in_data_packets)?;
        write!(f, "     extended headers: {}", self.num_extended_headers)
    }
}

/// NEUEVWAV contents: per-electrode spike acquisition settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaveformHeader {
    pub electrode_id: u16,
    pub physical_connector: u8,
    pub connector_pin: u8,
    pub digitization_factor: u16,
    pub energy_threshold: u16,
    pub high_threshold: i16,
    pub low_threshold: i16,
    pub num_sorted_units: u8,
    pub bytes_per_waveform: u8,
    pub spike_width_samples: u16,
}

/// NEUEVFLT contents: per-electrode filter descriptors.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FilterHeader {
    pub electrode_id: u16,
    pub high_freq_corner_hz: f64,
    pub high_freq_order: u32,
    pub high_freq_type: FilterType,
    pub low_freq_corner_hz: f64,
    pub low_freq_order: u32,
    pub low_freq_type: FilterType,
}

/// NSASEXEV contents: periodic sampling plus trigger configuration for
/// the digital input and the five analog inputs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SamplingHeader {
    pub frequency: u16,
    pub digital_input: DigitalConfig,
    pub analog_configs: [(crate::codec::AnalogConfig, i16); 5],
}

/// One 32-byte extended header, tagged by its 8-byte packet id string.
/// Declaration order in the file is preserved.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum NevExtHeader {
    ArrayName(String),
    ExtraComment(String),
    ContComment(String),
    MapFile(String),
    Waveform(WaveformHeader),
    Label { electrode_id: u16, label: String },
    Filter(FilterHeader),
    DigitalLabel { label: String, mode: DigitalMode },
    PeriodicSampling(SamplingHeader),
    VideoSync {
        source_id: u16,
        source: String,
        frame_rate: f32,
    },
    TrackableObject {
        object_type: TrackingObjectType,
        object_id: u32,
        source: String,
    },
}

impl NevExtHeader {
    fn decode(tag: &str, input: &mut &[u8]) -> Result<NevExtHeader, NevNsxError> {
        let table = schema::nev_extended_table(tag)?;
        let fields = schema::decode(table, input)?;
        let header = match tag {
            "ARRAYNME" => NevExtHeader::ArrayName(fields.string("ArrayName")?),
            "ECOMMENT" => NevExtHeader::ExtraComment(fields.string("ExtraComment")?),
            "CCOMMENT" => NevExtHeader::ContComment(fields.string("ContComment")?),
            "MAPFILE" => NevExtHeader::MapFile(fields.string("MapFile")?),
            "NEUEVWAV" => NevExtHeader::Waveform(WaveformHeader {
                electrode_id: fields.u16("ElectrodeID")?,
                physical_connector: fields.u8("PhysicalConnector")?,
                connector_pin: fields.u8("ConnectorPin")?,
                digitization_factor: fields.u16("DigitizationFactor")?,
                energy_threshold: fields.u16("EnergyThreshold")?,
                high_threshold: fields.i16("HighThreshold")?,
                low_threshold: fields.i16("LowThreshold")?,
                num_sorted_units: fields.u8("NumSortedUnits")?,
                bytes_per_waveform: fields.u8("BytesPerWaveform")?,
                spike_width_samples: fields.u16("SpikeWidthSamples")?,
            }),
            "NEUEVLBL" => NevExtHeader::Label {
                electrode_id: fields.u16("ElectrodeID")?,
                label: fields.string("Label")?,
            },
            "NEUEVFLT" => NevExtHeader::Filter(FilterHeader {
                electrode_id: fields.u16("ElectrodeID")?,
                high_freq_corner_hz: fields.freq("HighFreqCorner")?,
                high_freq_order: fields.u32("HighFreqOrder")?,
                high_freq_type: fields.filter("HighFreqType")?,
                low_freq_corner_hz: fields.freq("LowFreqCorner")?,
                low_freq_order: fields.u32("LowFreqOrder")?,
                low_freq_type: fields.filter("LowFreqType")?,
            }),
            "DIGLABEL" => NevExtHeader::DigitalLabel {
                label: fields.string("Label")?,
                mode: fields.dig_mode("Mode")?,
            },
            "NSASEXEV" => NevExtHeader::PeriodicSampling(SamplingHeader {
                frequency: fields.u16("Frequency")?,
                digital_input: fields.dig_config("DigitalInputConfig")?,
                analog_configs: [
                    (fields.ana_config("AnalogCh1Config")?, fields.i16("AnalogCh1DetectVal")?),
                    (fields.ana_config("AnalogCh2Config")?, fields.i16("AnalogCh2DetectVal")?),
                    (fields.ana_config("AnalogCh3Config")?, fields.i16("AnalogCh3DetectVal")?),
                    (fields.ana_config("AnalogCh4Config")?, fields.i16("AnalogCh4DetectVal")?),
                    (fields.ana_config("AnalogCh5Config")?, fields.i16("AnalogCh5DetectVal")?),
                ],
            }),
            "VIDEOSYN" => NevExtHeader::VideoSync {
                source_id: fields.u16("VideoSourceID")?,
                source: fields.string("VideoSource")?,
                frame_rate: fields.f32("FrameRate")?,
            },
            "TRACKOBJ" => NevExtHeader::TrackableObject {
                object_type: fields.track_obj("TrackableType")?,
                object_id: fields.u32("TrackableID")?,
                source: fields.string("VideoSource")?,
            },
            _ => return Err(NevNsxError::UnknownHeaderKind(tag.to_string())),
        };
        Ok(header)
    }

    /// The 8-byte tag this variant was decoded from.
    pub fn tag(&self) -> &'static str {
        match self {
            NevExtHeader::ArrayName(_) => "ARRAYNME",
            NevExtHeader::ExtraComment(_) => "ECOMMENT",
            NevExtHeader::ContComment(_) => "CCOMMENT",
            NevExtHeader::MapFile(_) => "MAPFILE",
            NevExtHeader::Waveform(_) => "NEUEVWAV",
            NevExtHeader::Label { .. } => "NEUEVLBL",
            NevExtHeader::Filter(_) => "NEUEVFLT",
            NevExtHeader::DigitalLabel { .. } => "DIGLABEL",
            NevExtHeader::PeriodicSampling(_) => "NSASEXEV",
            NevExtHeader::VideoSync { .. } => "VIDEOSYN",
            NevExtHeader::TrackableObject { .. } => "TRACKOBJ",
        }
    }
}

/// Spike events: one entry per NEURAL-class packet that survived the
/// channel filter.
#[derive(Debug, Clone, Default)]
pub struct SpikeEvents {
    pub timestamps: Vec<u64>,
    pub channel: Vec<u16>,
    pub unit: Vec<u8>,
    /// One row per event, `spike width` columns; absent when waveform
    /// reading was not requested.
    pub waveforms: Option<SampleMatrix>,
}

#[derive(Debug, Clone, Default)]
pub struct DigitalEvents {
    pub timestamps: Vec<u64>,
    pub insertion_reason: Vec<u8>,
    pub unparsed_data: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Comments {
    pub timestamps: Vec<u64>,
    pub timestamps_started: Vec<u32>,
    pub char_set: Vec<u8>,
    pub text: Vec<String>,
}

/// Region-of-interest events carried in comment packets with the
/// `CharSet` sentinel.
#[derive(Debug, Clone, Default)]
pub struct RoiEvents {
    pub timestamps: Vec<u64>,
    pub roi_name: Vec<String>,
    pub roi_number: Vec<String>,
    pub event: Vec<String>,
    pub frame: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VideoSyncEvents {
    pub timestamps: Vec<u64>,
    pub file_number: Vec<u16>,
    pub frame_number: Vec<u32>,
    pub elapsed_time_ms: Vec<u32>,
    pub source_id: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackingMarkers {
    pub timestamps: Vec<u64>,
    pub parent_id: Vec<u16>,
    pub node_id: Vec<u16>,
    pub node_count: Vec<u16>,
    pub marker_count: Vec<u16>,
    pub x: Vec<u16>,
    pub y: Vec<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct ButtonEvents {
    pub timestamps: Vec<u64>,
    pub trigger_type: Vec<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigEvents {
    pub timestamps: Vec<u64>,
    pub change_type: Vec<u16>,
}

/// Bulk-extraction result. A class is `None` when no packet of that
/// class exists in the file.
#[derive(Debug, Clone, Default)]
pub struct NevData {
    pub spike_events: Option<SpikeEvents>,
    pub digital_events: Option<DigitalEvents>,
    pub comments: Option<Comments>,
    pub tracking_events: Option<RoiEvents>,
    pub video_sync_events: Option<VideoSyncEvents>,
    pub tracking: Option<TrackingMarkers>,
    pub button_events: Option<ButtonEvents>,
    pub config_events: Option<ConfigEvents>,
}

/// An open NEV file: headers parsed eagerly, the packet stream kept
/// memory mapped until `get_data` is called.
pub struct NevFile {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
    mmap: Mmap,
    pub basic_header: NevBasicHeader,
    pub extended_headers: Vec<NevExtHeader>,
}

impl NevFile {
    /// Open and parse the basic header plus all extended headers. The
    /// file handle stays owned until the value is dropped or `close`d.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<NevFile, NevNsxError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let mut input = &mmap[..];
        let fields = schema::decode(schema::NEV_BASIC, &mut input)?;
        let basic_header = NevBasicHeader::from_fields(&fields)?;
        if basic_header.bytes_in_header as usize > mmap.len() {
            return Err(NevNsxError::UnexpectedEof(
                basic_header.bytes_in_header as usize - mmap.len(),
                "NEV header block",
            ));
        }

        let mut extended_headers = Vec::with_capacity(basic_header.num_extended_headers as usize);
        for _ in 0..basic_header.num_extended_headers {
            let tag_bytes = crate::codec::read_bytes(&mut input, 8, "extended header tag")?;
            let tag = latin1_string(tag_bytes);
            let mut header = NevExtHeader::decode(&tag, &mut input)?;
            // Before spec 2.3 the spike width field is unset on disk.
            if let NevExtHeader::Waveform(w) = &mut header {
                if basic_header.file_spec < FileSpec::new(2, 3) {
                    w.spike_width_samples = WAVEFORM_SAMPLES_LEGACY;
                }
            }
            extended_headers.push(header);
        }

        Ok(NevFile {
            path,
            file,
            mmap,
            basic_header,
            extended_headers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of whole event packets after the header block.
    pub fn packet_count(&self) -> usize {
        let data = self.mmap.len() - self.basic_header.bytes_in_header as usize;
        data / self.basic_header.bytes_in_data_packets as usize
    }

    /// Bulk-extract every packet class into typed vectors.
    ///
    /// `elec_ids` restricts the NEURAL class to the listed channels;
    /// `None` keeps everything. `wave_read` controls whether spike
    /// waveform samples are materialized.
    pub fn get_data(
        &self,
        elec_ids: Option<&[u16]>,
        wave_read: bool,
    ) -> Result<NevData, NevNsxError> {
        let ts_size = self.basic_header.timestamp_size();
        let stride = self.basic_header.bytes_in_data_packets as usize;
        let data = &self.mmap[self.basic_header.bytes_in_header as usize..];
        let n = data.len() / stride;

        let ts: Vec<u64> = if ts_size == 8 {
            StridedView::<u64>::new(data, 0, stride, n)?.to_vec()
        } else {
            StridedView::<u32>::new(data, 0, stride, n)?
                .iter()
                .map(u64::from)
                .collect()
        };
        let packet_id = StridedView::<u16>::new(data, ts_size, stride, n)?;

        let mut neural = Vec::new();
        let mut digital = Vec::new();
        let mut comment = Vec::new();
        let mut video = Vec::new();
        let mut tracking = Vec::new();
        let mut button = Vec::new();
        let mut config = Vec::new();
        for i in 0..n {
            match packet_id.get(i) {
                DIGITAL_PACKET_ID => digital.push(i),
                id if (NEURAL_PACKET_ID_MIN..=NEURAL_PACKET_ID_MAX).contains(&id) => {
                    neural.push(i)
                }
                COMMENT_PACKET_ID => comment.push(i),
                VIDEO_SYNC_PACKET_ID => video.push(i),
                TRACKING_PACKET_ID => tracking.push(i),
                BUTTON_PACKET_ID => button.push(i),
                CONFIGURATION_PACKET_ID => config.push(i),
                _ => {}
            }
        }

        let mut output = NevData::default();

        if !neural.is_empty() {
            // Membership is resolved once, not per event.
            if let Some(ids) = elec_ids {
                let allow: HashSet<u16> = ids.iter().copied().collect();
                neural.retain(|&i| allow.contains(&packet_id.get(i)));
            }
            let unit = StridedView::<u8>::new(data, ts_size + 2, stride, n)?;
            let waveforms = if wave_read {
                let width = (stride - ts_size - 4) / 2;
                let mut wfs = SampleMatrix::zeroed(neural.len(), width)?;
                for (row, &i) in neural.iter().enumerate() {
                    let base = i * stride + ts_size + 4;
                    for col in 0..width {
                        let at = base + 2 * col;
                        wfs.set(
                            row,
                            col,
                            i16::from_le_bytes([data[at], data[at + 1]]),
                        );
                    }
                }
                Some(wfs)
            } else {
                None
            };
            output.spike_events = Some(SpikeEvents {
                timestamps: neural.iter().map(|&i| ts[i]).collect(),
                channel: neural.iter().map(|&i| packet_id.get(i)).collect(),
                unit: neural.iter().map(|&i| unit.get(i)).collect(),
                waveforms,
            });
        }

        if !digital.is_empty() {
            let reason = StridedView::<u8>::new(data, ts_size + 2, stride, n)?;
            let values = StridedView::<u32>::new(data, ts_size + 4, stride, n)?;
            output.digital_events = Some(DigitalEvents {
                timestamps: digital.iter().map(|&i| ts[i]).collect(),
                insertion_reason: digital.iter().map(|&i| reason.get(i)).collect(),
                unparsed_data: digital.iter().map(|&i| values.get(i)).collect(),
            });
        }

        if !comment.is_empty() {
            self.extract_comments(data, stride, ts_size, &ts, &comment, &mut output)?;
        }

        if !video.is_empty() {
            let file_number = StridedView::<u16>::new(data, ts_size + 2, stride, n)?;
            let frame_number = StridedView::<u32>::new(data, ts_size + 4, stride, n)?;
            let elapsed = StridedView::<u32>::new(data, ts_size + 8, stride, n)?;
            let source = StridedView::<u32>::new(data, ts_size + 12, stride, n)?;
            output.video_sync_events = Some(VideoSyncEvents {
                timestamps: video.iter().map(|&i| ts[i]).collect(),
                file_number: video.iter().map(|&i| file_number.get(i)).collect(),
                frame_number: video.iter().map(|&i| frame_number.get(i)).collect(),
                elapsed_time_ms: video.iter().map(|&i| elapsed.get(i)).collect(),
                source_id: video.iter().map(|&i| source.get(i)).collect(),
            });
        }

        if !tracking.is_empty() {
            let parent = StridedView::<u16>::new(data, ts_size + 2, stride, n)?;
            let node = StridedView::<u16>::new(data, ts_size + 4, stride, n)?;
            let node_count = StridedView::<u16>::new(data, ts_size + 6, stride, n)?;
            let marker_count = StridedView::<u16>::new(data, ts_size + 8, stride, n)?;
            let x = StridedView::<u16>::new(data, ts_size + 10, stride, n)?;
            let y = StridedView::<u16>::new(data, ts_size + 12, stride, n)?;
            output.tracking = Some(TrackingMarkers {
                timestamps: tracking.iter().map(|&i| ts[i]).collect(),
                parent_id: tracking.iter().map(|&i| parent.get(i)).collect(),
                node_id: tracking.iter().map(|&i| node.get(i)).collect(),
                node_count: tracking.iter().map(|&i| node_count.get(i)).collect(),
                marker_count: tracking.iter().map(|&i| marker_count.get(i)).collect(),
                x: tracking.iter().map(|&i| x.get(i)).collect(),
                y: tracking.iter().map(|&i| y.get(i)).collect(),
            });
        }

        if !button.is_empty() {
            let trigger = StridedView::<u16>::new(data, ts_size + 2, stride, n)?;
            output.button_events = Some(ButtonEvents {
                timestamps: button.iter().map(|&i| ts[i]).collect(),
                trigger_type: button.iter().map(|&i| trigger.get(i)).collect(),
            });
        }

        if !config.is_empty() {
            let change = StridedView::<u16>::new(data, ts_size + 2, stride, n)?;
            output.config_events = Some(ConfigEvents {
                timestamps: config.iter().map(|&i| ts[i]).collect(),
                change_type: config.iter().map(|&i| change.get(i)).collect(),
            });
        }

        Ok(output)
    }

    /// Split the COMMENT class into text comments and ROI events on the
    /// `CharSet` sentinel. The final byte of each packet's text region
    /// is sacrificed to the split delimiter.
    fn extract_comments(
        &self,
        data: &[u8],
        stride: usize,
        ts_size: usize,
        ts: &[u64],
        comment: &[usize],
        output: &mut NevData,
    ) -> Result<(), NevNsxError> {
        let n = data.len() / stride;
        let text_len = stride.checked_sub(ts_size + 10).ok_or_else(|| {
            NevNsxError::InvariantViolation(format!(
                "packet width {} too small for comment payload",
                stride
            ))
        })?;
        let char_set = StridedView::<u8>::new(data, ts_size + 2, stride, n)?;
        let started = StridedView::<u32>::new(data, ts_size + 4, stride, n)?;

        let mut comments = Comments::default();
        let mut roi = RoiEvents::default();
        for &i in comment {
            let region = &data[i * stride + ts_size + 8..i * stride + ts_size + 8 + text_len];
            let body: String = region[..text_len.saturating_sub(1)]
                .iter()
                .filter(|&&b| b != 0)
                .map(|&b| b as char)
                .collect();
            if char_set.get(i) == CHARSET_ROI {
                let mut parts = body.split(':');
                roi.timestamps.push(ts[i]);
                roi.roi_name.push(parts.next().unwrap_or("").to_string());
                roi.roi_number.push(parts.next().unwrap_or("").to_string());
                roi.event.push(parts.next().unwrap_or("").to_string());
                roi.frame.push(parts.next().unwrap_or("").to_string());
            } else {
                comments.timestamps.push(ts[i]);
                comments.timestamps_started.push(started.get(i));
                comments.char_set.push(char_set.get(i));
                comments.text.push(body);
            }
        }
        if !comments.timestamps.is_empty() {
            output.comments = Some(comments);
        }
        if !roi.timestamps.is_empty() {
            output.tracking_events = Some(roi);
        }
        Ok(())
    }

    /// Release the backing file. Dropping the value has the same
    /// effect; this form logs the release.
    pub fn close(self) {
        info!("{} closed", self.path.display());
    }
}

impl fmt::Display for NevFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.basic_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    fn nev_basic_header_bytes(
        file_type: &str,
        spec: (u8, u8),
        packet_bytes: u32,
        num_ext: u32,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        crate::codec::write_fixed_string(&mut out, file_type, 8).unwrap();
        out.push(spec.0);
        out.push(spec.1);
        out.write_u16::<LittleEndian>(0).unwrap(); // AddFlags
        out.write_u32::<LittleEndian>(336 + 32 * num_ext).unwrap();
        out.write_u32::<LittleEndian>(packet_bytes).unwrap();
        out.write_u32::<LittleEndian>(30000).unwrap();
        out.write_u32::<LittleEndian>(30000).unwrap();
        for v in [2021u16, 6, 2, 15, 10, 30, 0, 0] {
            out.write_u16::<LittleEndian>(v).unwrap();
        }
        crate::codec::write_fixed_string(&mut out, "unit test", 32).unwrap();
        crate::codec::write_fixed_string(&mut out, "", 256).unwrap();
        out.write_u32::<LittleEndian>(num_ext).unwrap();
        assert_eq!(out.len(), 336);
        out
    }

    fn neuevwav_bytes(electrode_id: u16, spike_width: u16) -> Vec<u8> {
        let mut out = Vec::new();
        crate::codec::write_fixed_string(&mut out, "NEUEVWAV", 8).unwrap();
        out.write_u16::<LittleEndian>(electrode_id).unwrap();
        out.push(1); // PhysicalConnector
        out.push(3); // ConnectorPin
        out.write_u16::<LittleEndian>(250).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_i16::<LittleEndian>(100).unwrap();
        out.write_i16::<LittleEndian>(-100).unwrap();
        out.push(2);
        out.push(2);
        out.write_u16::<LittleEndian>(spike_width).unwrap();
        out.write_all(&[0u8; 8]).unwrap();
        assert_eq!(out.len(), 32);
        out
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn neural_packet(ts: u32, channel: u16, unit: u8, packet_bytes: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(ts).unwrap();
        out.write_u16::<LittleEndian>(channel).unwrap();
        out.push(unit);
        out.push(0);
        let wave_samples = (packet_bytes - 8) / 2;
        for k in 0..wave_samples {
            out.write_i16::<LittleEndian>(k as i16 - 3).unwrap();
        }
        assert_eq!(out.len(), packet_bytes);
        out
    }

    fn comment_packet(ts: u32, char_set: u8, text: &str, packet_bytes: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(ts).unwrap();
        out.write_u16::<LittleEndian>(COMMENT_PACKET_ID).unwrap();
        out.push(char_set);
        out.push(0);
        out.write_u32::<LittleEndian>(ts).unwrap(); // TimestampStarted
        crate::codec::write_fixed_string(&mut out, text, packet_bytes - 12).unwrap();
        assert_eq!(out.len(), packet_bytes);
        out
    }

    #[test]
    fn open_parses_headers_and_spike_width_fixup() {
        let mut bytes = nev_basic_header_bytes("NEURALEV", (2, 2), 104, 1);
        bytes.extend(neuevwav_bytes(5, 0));
        let f = write_temp(&bytes);
        let nev = NevFile::open(f.path()).unwrap();
        assert_eq!(nev.basic_header.file_spec, FileSpec::new(2, 2));
        assert_eq!(nev.extended_headers.len(), 1);
        match &nev.extended_headers[0] {
            NevExtHeader::Waveform(w) => {
                assert_eq!(w.electrode_id, 5);
                // spec < 2.3 forces the legacy width
                assert_eq!(w.spike_width_samples, WAVEFORM_SAMPLES_LEGACY);
            }
            other => panic!("expected NEUEVWAV, got {}", other.tag()),
        }
    }

    #[test]
    fn bulk_extract_waveform_shapes() {
        let packet_bytes = 104usize;
        let mut bytes = nev_basic_header_bytes("NEURALEV", (2, 3), packet_bytes as u32, 0);
        for i in 0..100u32 {
            bytes.extend(neural_packet(i * 30, 1 + (i % 4) as u16, 0, packet_bytes));
        }
        let f = write_temp(&bytes);
        let nev = NevFile::open(f.path()).unwrap();
        assert_eq!(nev.packet_count(), 100);

        let with_waves = nev.get_data(None, true).unwrap();
        let spikes = with_waves.spike_events.unwrap();
        let wfs = spikes.waveforms.unwrap();
        assert_eq!(wfs.rows(), 100);
        assert_eq!(wfs.cols(), 48);
        assert_eq!(wfs.get(0, 0), -3);
        assert_eq!(wfs.get(99, 47), 44);

        let without = nev.get_data(None, false).unwrap();
        assert!(without.spike_events.unwrap().waveforms.is_none());
    }

    #[test]
    fn channel_filter_restricts_neural_class() {
        let packet_bytes = 104usize;
        let mut bytes = nev_basic_header_bytes("NEURALEV", (2, 3), packet_bytes as u32, 0);
        for i in 0..10u32 {
            bytes.extend(neural_packet(i, 1 + (i % 2) as u16, 0, packet_bytes));
        }
        let f = write_temp(&bytes);
        let nev = NevFile::open(f.path()).unwrap();
        let data = nev.get_data(Some(&[2]), false).unwrap();
        let spikes = data.spike_events.unwrap();
        assert_eq!(spikes.channel, vec![2; 5]);
        assert_eq!(spikes.timestamps, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn roi_comment_tie_break() {
        let packet_bytes = 40usize;
        let mut bytes = nev_basic_header_bytes("NEURALEV", (2, 3), packet_bytes as u32, 0);
        for i in 0..8u32 {
            bytes.extend(comment_packet(i, (i % 2) as u8, "hello", packet_bytes));
        }
        bytes.extend(comment_packet(100, CHARSET_ROI, "myROI:7:1:42:", packet_bytes));
        bytes.extend(comment_packet(101, CHARSET_ROI, "myROI:7:2:43:", packet_bytes));
        let f = write_temp(&bytes);
        let nev = NevFile::open(f.path()).unwrap();
        let data = nev.get_data(None, false).unwrap();

        let comments = data.comments.unwrap();
        assert_eq!(comments.text.len(), 8);
        assert!(comments.text.iter().all(|t| t == "hello"));
        assert_eq!(comments.char_set[0], 0);
        assert_eq!(comments.char_set[1], 1);

        let roi = data.tracking_events.unwrap();
        assert_eq!(roi.timestamps, vec![100, 101]);
        assert_eq!(roi.roi_name, vec!["myROI", "myROI"]);
        assert_eq!(roi.roi_number, vec!["7", "7"]);
        assert_eq!(roi.event, vec!["1", "2"]);
        assert_eq!(roi.frame, vec!["42", "43"]);
    }

    #[test]
    fn config_events_carry_change_type() {
        let packet_bytes = 16usize;
        let mut bytes = nev_basic_header_bytes("NEURALEV", (2, 3), packet_bytes as u32, 0);
        let mut pkt = Vec::new();
        pkt.write_u32::<LittleEndian>(77).unwrap();
        pkt.write_u16::<LittleEndian>(CONFIGURATION_PACKET_ID).unwrap();
        pkt.write_u16::<LittleEndian>(1).unwrap(); // critical change
        pkt.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&pkt);
        let f = write_temp(&bytes);
        let nev = NevFile::open(f.path()).unwrap();
        let data = nev.get_data(None, false).unwrap();
        let cfg = data.config_events.unwrap();
        assert_eq!(cfg.timestamps, vec![77]);
        assert_eq!(cfg.change_type, vec![1]);
    }

    #[test]
    fn packet_accounting_matches_file_size() {
        let packet_bytes = 104usize;
        let mut bytes = nev_basic_header_bytes("NEURALEV", (2, 3), packet_bytes as u32, 0);
        for i in 0..7u32 {
            bytes.extend(neural_packet(i, 1, 0, packet_bytes));
        }
        let f = write_temp(&bytes);
        let nev = NevFile::open(f.path()).unwrap();
        let total = nev.packet_count() as u32 * nev.basic_header.bytes_in_data_packets
            + nev.basic_header.bytes_in_header;
        assert_eq!(total as usize, bytes.len());
    }
}
