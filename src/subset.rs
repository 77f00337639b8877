//! Byte-faithful NSx subset writer.
//!
//! Emits one or more output files holding a chosen channel subset of a
//! source NSx file. Headers are copied from the source map with the
//! channel count and header length patched; sample data streams through
//! a bounded windowed copy that keeps only the allow-listed columns.
//! Outputs split on a byte- or duration-bound, and the `NumDataPoints`
//! field of each packet header is patched in place before its file is
//! closed.

use byteorder::{LittleEndian, WriteBytesExt};
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::filespec::FileRevision;
use crate::nevnsx_error::NevNsxError;
use crate::nsx::{NsxFile, DATA_BYTE_SIZE, EXT_HEADER_BYTES, MODERN_BASIC_BYTES};

/// At most this many bytes of sample data are staged per copy pass.
pub const DATA_PAGING_SIZE: u64 = 1 << 30;

/// Smallest accepted byte bound for one output file.
pub const DATA_FILE_SIZE_MIN: u64 = 10 * 1024 * 1024;

/// Subset parameters. When both a size and a time bound are given the
/// time bound wins.
#[derive(Debug, Clone)]
pub struct SubsetOptions {
    /// Channel allow-list; `None` keeps every channel.
    pub elec_ids: Option<Vec<u16>>,
    /// Byte bound per output file, clamped up to `DATA_FILE_SIZE_MIN`.
    pub file_size: Option<u64>,
    /// Duration bound per output file in seconds.
    pub file_time_s: Option<f64>,
    /// Inserted into output names; empty means `subset`.
    pub suffix: String,
    /// Allow clobbering an existing first output file.
    pub overwrite: bool,
}

impl Default for SubsetOptions {
    fn default() -> SubsetOptions {
        SubsetOptions {
            elec_ids: None,
            file_size: None,
            file_time_s: None,
            suffix: String::new(),
            overwrite: false,
        }
    }
}

/// One source data packet as laid out on disk.
struct RawPacket {
    timestamp: u64,
    rows: usize,
    data_offset: usize,
    row_stride: usize,
}

impl NsxFile {
    /// Write the channel subset, splitting output files on the
    /// configured bound, and return the written paths in order.
    pub fn save_subset(&self, opts: &SubsetOptions) -> Result<Vec<PathBuf>, NevNsxError> {
        let (sel_ids, cols) = self
            .resolve_channels(opts.elec_ids.as_deref())
            .ok_or_else(|| {
                NevNsxError::InvalidArgument(
                    "none of the requested electrodes exist in the data".to_string(),
                )
            })?;
        let num_elecs = sel_ids.len();
        let out_row = num_elecs * DATA_BYTE_SIZE;
        let legacy = self.revision == FileRevision::Legacy21;
        let ts_size = self.revision.timestamp_size();

        let header_block = self.subset_header_block(&sel_ids);
        let size_bound = self.resolve_size_bound(opts, num_elecs, header_block.len(), out_row)?;

        let suffix = if opts.suffix.is_empty() {
            "subset"
        } else {
            opts.suffix.as_str()
        };
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let dir = self.path.parent().map(PathBuf::from).unwrap_or_default();
        let numbered = |n: usize| dir.join(format!("{}_{}_{:03}{}", stem, suffix, n, ext));

        let first_path = numbered(0);
        if first_path.exists() && !opts.overwrite {
            return Err(NevNsxError::OverwriteRefused(first_path));
        }

        info!("writing subset file {}", first_path.display());
        let mut out = BufWriter::new(File::create(&first_path)?);
        out.write_all(&header_block)?;
        let mut paths = vec![first_path];

        let packets = self.raw_packets();
        if opts.file_time_s.is_some() && packets.len() > 1 {
            warn!(
                "source file pauses; time-bounded outputs may run short and \
                 contain multiple data packets"
            );
        }

        let page_rows = (DATA_PAGING_SIZE as usize
            / (self.basic_header.channel_count as usize * DATA_BYTE_SIZE))
            .max(1);
        let period = self.basic_header.period as u64;
        let packet_header_len = self.packet_header_len();

        for pkt in &packets {
            // A packet whose header and first row cannot fit starts in
            // the next file.
            if let Some(limit) = size_bound {
                let pos = out.stream_position()?;
                if pos > header_block.len() as u64
                    && pos + packet_header_len + out_row as u64 > limit
                {
                    next_output(&mut out, &mut paths, &numbered, &header_block)?;
                }
            }
            let mut num_pts_pos = if legacy {
                None
            } else {
                Some(write_packet_header(
                    &mut out,
                    ts_size,
                    pkt.timestamp,
                    pkt.rows as u32,
                )?)
            };
            let mut rows_in_file = 0u32;
            let mut rows_done = 0usize;
            while rows_done < pkt.rows {
                // How many full sample rows still fit in this output.
                // Forward progress on a fresh file is guaranteed by the
                // bound floor in resolve_size_bound.
                let rows_can_add = match size_bound {
                    Some(limit) => {
                        let pos = out.stream_position()?;
                        ((limit.saturating_sub(pos)) / out_row as u64) as usize
                    }
                    None => pkt.rows - rows_done,
                };
                let chunk = (pkt.rows - rows_done).min(rows_can_add).min(page_rows);
                for row in rows_done..rows_done + chunk {
                    let base = pkt.data_offset + row * pkt.row_stride;
                    for &col in &cols {
                        let at = base + DATA_BYTE_SIZE * col;
                        out.write_all(&self.mmap[at..at + DATA_BYTE_SIZE])?;
                    }
                }
                rows_done += chunk;
                rows_in_file += chunk as u32;

                if size_bound.is_some() && chunk == rows_can_add && rows_done < pkt.rows {
                    // This output is full mid-packet: fix up its count,
                    // then continue the packet in the next file.
                    if let Some(pos) = num_pts_pos {
                        patch_num_data_points(&mut out, pos, rows_in_file)?;
                    }
                    next_output(&mut out, &mut paths, &numbered, &header_block)?;
                    if !legacy {
                        let timestamp = pkt.timestamp + rows_done as u64 * period;
                        num_pts_pos = Some(write_packet_header(
                            &mut out,
                            ts_size,
                            timestamp,
                            (pkt.rows - rows_done) as u32,
                        )?);
                    }
                    rows_in_file = 0;
                }
            }
            if let Some(pos) = num_pts_pos {
                patch_num_data_points(&mut out, pos, rows_in_file)?;
            }
        }
        out.flush()?;
        info!("all subset files written and closed");
        Ok(paths)
    }

    /// Basic plus extended headers for every output file, patched for
    /// the selected channels. Everything else is copied verbatim from
    /// the source map.
    fn subset_header_block(&self, sel_ids: &[u16]) -> Vec<u8> {
        let n = sel_ids.len() as u32;
        let mut block = Vec::new();
        if self.revision == FileRevision::Legacy21 {
            block.extend_from_slice(&self.mmap[..28]);
            block.extend_from_slice(&n.to_le_bytes());
            for &id in sel_ids {
                block.extend_from_slice(&(id as u32).to_le_bytes());
            }
        } else {
            block.extend_from_slice(&self.mmap[..10]);
            let bytes_in_headers = MODERN_BASIC_BYTES + EXT_HEADER_BYTES * n;
            block.extend_from_slice(&bytes_in_headers.to_le_bytes());
            block.extend_from_slice(&self.mmap[14..310]);
            block.extend_from_slice(&n.to_le_bytes());
            for (i, header) in self.extended_headers.iter().enumerate() {
                if sel_ids.contains(&header.electrode_id) {
                    let at = MODERN_BASIC_BYTES as usize + EXT_HEADER_BYTES as usize * i;
                    block.extend_from_slice(&self.mmap[at..at + EXT_HEADER_BYTES as usize]);
                }
            }
        }
        block
    }

    /// Bytes of one packet header in this file's layout: reserved byte,
    /// timestamp and NumDataPoints. Legacy files have none.
    fn packet_header_len(&self) -> u64 {
        if self.revision == FileRevision::Legacy21 {
            0
        } else {
            1 + self.revision.timestamp_size() as u64 + 4
        }
    }

    /// The effective byte bound: a duration converts to bytes, an
    /// explicit size clamps to the minimum, and either is floored at
    /// one header block plus one packet header plus one row so every
    /// output makes progress.
    fn resolve_size_bound(
        &self,
        opts: &SubsetOptions,
        num_elecs: usize,
        header_len: usize,
        out_row: usize,
    ) -> Result<Option<u64>, NevNsxError> {
        let packet_header = self.packet_header_len();
        let bound = if let Some(t) = opts.file_time_s {
            if opts.file_size.is_some() {
                warn!("both file_size and file_time_s passed, using file_time_s");
            }
            if !t.is_finite() || t <= 0.0 {
                return Err(NevNsxError::InvalidArgument(format!(
                    "file_time_s must be a positive duration, got {}",
                    t
                )));
            }
            let payload = num_elecs as f64
                * DATA_BYTE_SIZE as f64
                * t
                * self.basic_header.timestamp_resolution as f64
                / self.basic_header.period as f64;
            let size = payload as u64 + header_len as u64 + packet_header;
            info!("time bound maps to {} byte outputs", size);
            Some(size)
        } else if let Some(s) = opts.file_size {
            if s < DATA_FILE_SIZE_MIN {
                warn!(
                    "file_size must be at least {} bytes, clamping",
                    DATA_FILE_SIZE_MIN
                );
                Some(DATA_FILE_SIZE_MIN)
            } else {
                Some(s)
            }
        } else {
            None
        };
        Ok(bound.map(|b| b.max(header_len as u64 + packet_header + out_row as u64)))
    }

    /// The on-disk data packet list. Legacy files expose their single
    /// implicit run; zero-length packets are skipped.
    fn raw_packets(&self) -> Vec<RawPacket> {
        if self.revision == FileRevision::Legacy21 {
            return self
                .segments
                .iter()
                .map(|seg| RawPacket {
                    timestamp: 0,
                    rows: seg.num_samples,
                    data_offset: seg.byte_offset_to_data,
                    row_stride: seg.row_stride,
                })
                .collect();
        }
        // Segment discovery already walked the packet stream; for
        // multi-sample files segments are exactly the packets, and for
        // PTP files each segment is a run of one-sample packets that
        // must be re-split to stay byte-faithful.
        if self.revision.is_ptp() {
            let mut packets = Vec::new();
            for seg in &self.segments {
                for i in 0..seg.num_samples {
                    let rec_data = seg.byte_offset_to_data + i * seg.row_stride;
                    let ts_bytes: [u8; 8] = self.mmap[rec_data - 12..rec_data - 4]
                        .try_into()
                        .unwrap();
                    let timestamp = u64::from_le_bytes(ts_bytes);
                    packets.push(RawPacket {
                        timestamp,
                        rows: 1,
                        data_offset: rec_data,
                        row_stride: seg.row_stride,
                    });
                }
            }
            packets
        } else {
            self.segments
                .iter()
                .map(|seg| RawPacket {
                    timestamp: seg.first_timestamp,
                    rows: seg.num_samples,
                    data_offset: seg.byte_offset_to_data,
                    row_stride: seg.row_stride,
                })
                .collect()
        }
    }
}

/// Finish the current output file and start the next numbered one with
/// a fresh copy of the header block.
fn next_output(
    out: &mut BufWriter<File>,
    paths: &mut Vec<PathBuf>,
    numbered: &dyn Fn(usize) -> PathBuf,
    header_block: &[u8],
) -> Result<(), NevNsxError> {
    out.flush()?;
    let path = numbered(paths.len());
    info!("writing subset file {}", path.display());
    *out = BufWriter::new(File::create(&path)?);
    out.write_all(header_block)?;
    paths.push(path);
    Ok(())
}

/// Write one packet header, returning the position of the
/// `NumDataPoints` field for later fix-up.
fn write_packet_header(
    out: &mut BufWriter<File>,
    ts_size: usize,
    timestamp: u64,
    rows: u32,
) -> Result<u64, NevNsxError> {
    out.write_all(&[0x01])?;
    if ts_size == 8 {
        out.write_u64::<LittleEndian>(timestamp)?;
    } else {
        out.write_u32::<LittleEndian>(timestamp as u32)?;
    }
    let pos = out.stream_position()?;
    out.write_u32::<LittleEndian>(rows)?;
    Ok(pos)
}

/// Seek back within the current output and rewrite a packet's
/// `NumDataPoints` with the true count. Never crosses files.
fn patch_num_data_points(
    out: &mut BufWriter<File>,
    pos: u64,
    count: u32,
) -> Result<(), NevNsxError> {
    let current = out.stream_position()?;
    out.seek(SeekFrom::Start(pos))?;
    out.write_u32::<LittleEndian>(count)?;
    out.seek(SeekFrom::Start(current))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nsx::testsupport::*;
    use crate::nsx::ExtractOptions;

    fn modern_source(dir: &std::path::Path, cc: u16, rows: &[Vec<i16>]) -> PathBuf {
        let mut bytes = modern_basic_bytes((2, 3), 30, 30000, cc as u32);
        for ch in 1..=cc {
            bytes.extend(channel_header_bytes(ch));
        }
        push_packet(&mut bytes, 4, 0, rows);
        let path = dir.join("source.ns3");
        std::fs::write(&path, &bytes).unwrap();
        path
    }

    #[test]
    fn full_subset_is_bitwise_identical() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..200)
            .map(|i| vec![i as i16, -(i as i16), 2 * i as i16])
            .collect();
        let path = modern_source(dir.path(), 3, &rows);
        let nsx = NsxFile::open(&path).unwrap();
        let paths = nsx.save_subset(&SubsetOptions::default()).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].file_name().unwrap().to_string_lossy().ends_with("_subset_000.ns3"));
        let original = std::fs::read(&path).unwrap();
        let written = std::fs::read(&paths[0]).unwrap();
        assert_eq!(original, written);
    }

    #[test]
    fn channel_projection() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..100)
            .map(|i| vec![i as i16, 1000 + i as i16, 2000 + i as i16, 3000 + i as i16])
            .collect();
        let path = modern_source(dir.path(), 4, &rows);
        let nsx = NsxFile::open(&path).unwrap();
        let paths = nsx
            .save_subset(&SubsetOptions {
                elec_ids: Some(vec![4, 2]),
                ..Default::default()
            })
            .unwrap();

        let sub = NsxFile::open(&paths[0]).unwrap();
        assert_eq!(sub.elec_ids(), vec![2, 4]);
        assert_eq!(sub.basic_header.channel_count, 2);
        assert_eq!(
            sub.basic_header.bytes_in_header,
            MODERN_BASIC_BYTES + 2 * EXT_HEADER_BYTES
        );
        let opts = ExtractOptions {
            elec_rows: false,
            ..Default::default()
        };
        let data = sub.get_data(&opts).unwrap();
        for i in 0..100 {
            assert_eq!(data.data[0].get(i, 0), 1000 + i as i16); // source column 1
            assert_eq!(data.data[0].get(i, 1), 3000 + i as i16); // source column 3
        }
    }

    #[test]
    fn time_bounded_split_and_count_patching() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..3000).map(|i| vec![i as i16, -(i as i16)]).collect();
        let path = modern_source(dir.path(), 2, &rows);
        let nsx = NsxFile::open(&path).unwrap();
        // 1000 samples/s and a 1 s bound: 1000 rows per output
        let paths = nsx
            .save_subset(&SubsetOptions {
                file_time_s: Some(1.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(paths.len(), 3);

        let mut total_rows = 0usize;
        for (k, p) in paths.iter().enumerate() {
            let part = NsxFile::open(p).unwrap();
            assert_eq!(part.segments.len(), 1);
            // timestamps advance by rows already written times the period
            assert_eq!(part.segments[0].first_timestamp, k as u64 * 1000 * 30);
            // the packet header count matches the written payload
            let expected = (std::fs::metadata(p).unwrap().len() as usize
                - part.basic_header.bytes_in_header as usize
                - 9)
                / (2 * DATA_BYTE_SIZE);
            assert_eq!(part.segments[0].num_samples, expected);
            total_rows += part.segments[0].num_samples;
        }
        assert_eq!(total_rows, 3000);

        // payload stitches back to the source
        let last = NsxFile::open(&paths[2]).unwrap();
        let data = last
            .get_data(&ExtractOptions {
                elec_rows: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(data.data[0].get(0, 0), 2000);
    }

    #[test]
    fn time_bounded_split_with_odd_row_width() {
        // 3 channels: a 6-byte output row, deliberately different from
        // the 4-byte packet timestamp, so the byte accounting cannot
        // lean on the two widths coinciding.
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..3000)
            .map(|i| vec![i as i16, -(i as i16), 2 * i as i16])
            .collect();
        let path = modern_source(dir.path(), 3, &rows);
        let nsx = NsxFile::open(&path).unwrap();
        let paths = nsx
            .save_subset(&SubsetOptions {
                file_time_s: Some(1.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(paths.len(), 3);
        for (k, p) in paths.iter().enumerate() {
            let part = NsxFile::open(p).unwrap();
            // exactly one second of samples per file
            assert_eq!(part.segments[0].num_samples, 1000);
            assert_eq!(part.segments[0].first_timestamp, k as u64 * 1000 * 30);
        }
    }

    #[test]
    fn legacy_time_bounded_split() {
        // No per-packet header on legacy files; the duration bound must
        // still come out to exactly one second of rows per output.
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..3000).map(|i| vec![i as i16]).collect();
        let bytes = legacy_file_bytes(&[9], 30, &rows);
        let path = dir.path().join("legacy.ns2");
        std::fs::write(&path, &bytes).unwrap();
        let nsx = NsxFile::open(&path).unwrap();

        let paths = nsx
            .save_subset(&SubsetOptions {
                file_time_s: Some(1.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(paths.len(), 3);
        let mut total = 0usize;
        for (k, p) in paths.iter().enumerate() {
            let part = NsxFile::open(p).unwrap();
            assert_eq!(part.segments[0].num_samples, 1000);
            total += part.segments[0].num_samples;
            let data = part
                .get_data(&ExtractOptions {
                    elec_rows: false,
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(data.data[0].get(0, 0), (k * 1000) as i16);
        }
        assert_eq!(total, 3000);
    }

    #[test]
    fn ptp_subset_preserves_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = modern_basic_bytes((3, 0), 1, 1_000_000_000, 2);
        bytes.extend(channel_header_bytes(1));
        bytes.extend(channel_header_bytes(2));
        let timestamps: Vec<u64> = (0..500u64).map(|i| i * 33_333).collect();
        for (i, &t) in timestamps.iter().enumerate() {
            bytes.push(0x01);
            bytes.extend_from_slice(&t.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
            bytes.extend_from_slice(&(i as i16).to_le_bytes());
            bytes.extend_from_slice(&(-(i as i16)).to_le_bytes());
        }
        let path = dir.path().join("ptp.ns6");
        std::fs::write(&path, &bytes).unwrap();
        let nsx = NsxFile::open(&path).unwrap();
        assert!(nsx.revision().is_ptp());

        let paths = nsx.save_subset(&SubsetOptions::default()).unwrap();
        assert_eq!(
            std::fs::read(&path).unwrap(),
            std::fs::read(&paths[0]).unwrap()
        );

        let narrowed = nsx
            .save_subset(&SubsetOptions {
                elec_ids: Some(vec![2]),
                suffix: "ch2".to_string(),
                ..Default::default()
            })
            .unwrap();
        let sub = NsxFile::open(&narrowed[0]).unwrap();
        assert!(sub.revision().is_ptp());
        assert_eq!(sub.segments.len(), 1);
        assert_eq!(sub.segments[0].num_samples, 500);
        let data = sub
            .get_data(&ExtractOptions {
                elec_rows: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(data.data[0].get(17, 0), -17);
    }

    #[test]
    fn refuses_overwrite_without_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..10).map(|i| vec![i as i16]).collect();
        let path = modern_source(dir.path(), 1, &rows);
        let nsx = NsxFile::open(&path).unwrap();
        let first = nsx.save_subset(&SubsetOptions::default()).unwrap();
        assert_eq!(first.len(), 1);
        match nsx.save_subset(&SubsetOptions::default()) {
            Err(NevNsxError::OverwriteRefused(p)) => assert_eq!(p, first[0]),
            other => panic!("expected OverwriteRefused, got {:?}", other),
        }
        assert!(nsx
            .save_subset(&SubsetOptions {
                overwrite: true,
                ..Default::default()
            })
            .is_ok());
    }

    #[test]
    fn legacy_subset_rewrites_channel_list() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Vec<i16>> = (0..100)
            .map(|i| vec![i as i16, 10 + i as i16, 20 + i as i16])
            .collect();
        let bytes = legacy_file_bytes(&[5, 6, 7], 30, &rows);
        let path = dir.path().join("legacy.ns2");
        std::fs::write(&path, &bytes).unwrap();
        let nsx = NsxFile::open(&path).unwrap();

        let paths = nsx
            .save_subset(&SubsetOptions {
                elec_ids: Some(vec![7, 5]),
                ..Default::default()
            })
            .unwrap();
        let sub = NsxFile::open(&paths[0]).unwrap();
        assert_eq!(sub.basic_header.channel_ids, vec![5, 7]);
        assert_eq!(sub.basic_header.bytes_in_header, 32 + 8);
        assert_eq!(sub.segments[0].num_samples, 100);
        let data = sub
            .get_data(&ExtractOptions {
                elec_rows: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(data.data[0].get(9, 0), 9);
        assert_eq!(data.data[0].get(9, 1), 29);
    }
}
