//! A library for reading NEV and NSx neural recording files.
//!
//! Two sibling file families come out of the acquisition system: NEV
//! event files (spike, digital, comment and auxiliary event packets)
//! and NSx continuous files (channel-interleaved 16-bit samples in one
//! or more timestamped segments, across format revisions 2.1 through
//! 3.x with nanosecond PTP timestamps). The crate decodes both,
//! reconstructs logical segments, extracts time windows, and writes
//! channel subsets of NSx files back to disk.
//!
//! # Example
//!
//! ```no_run
//! use nevnsx::ExtractOptions;
//! # fn main() -> Result<(), nevnsx::NevNsxError> {
//! let nsx = nevnsx::open_nsx("recording.ns3")?;
//! let data = nsx.get_data(&ExtractOptions {
//!     elec_ids: Some(vec![1, 2, 3]),
//!     start_time_s: 1.0,
//!     data_time_s: Some(30.0),
//!     ..Default::default()
//! })?;
//! println!("{} segments at {} samples/s", data.data.len(), data.samp_per_s);
//! # Ok(())
//! # }
//! ```

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use std::path::Path;

mod codec;
mod filespec;
mod nev;
mod nevnsx_error;
mod nsx;
mod schema;
mod subset;
mod view;

pub use self::codec::{
    AnalogConfig, DigitalConfig, DigitalMode, FilterType, TrackingObjectType,
};
pub use self::filespec::{FileRevision, FileSpec};
pub use self::nev::{
    ButtonEvents, Comments, ConfigEvents, DigitalEvents, FilterHeader, NevBasicHeader, NevData,
    NevExtHeader, NevFile, RoiEvents, SamplingHeader, SpikeEvents, TrackingMarkers,
    VideoSyncEvents, WaveformHeader,
};
pub use self::nevnsx_error::NevNsxError;
pub use self::nsx::{
    ExtractOptions, NsxBasicHeader, NsxChannelHeader, NsxData, NsxFile, Segment, SegmentInfo,
    SAMPLE_RESOLUTION, UV_PER_BIT_LEGACY,
};
pub use self::subset::{SubsetOptions, DATA_FILE_SIZE_MIN, DATA_PAGING_SIZE};
pub use self::view::{SampleMatrix, StridedView};

lazy_static! {
    static ref NEV_EXT_REGEX: Regex = Regex::new(r"(?i)^\.nev$").unwrap();
    static ref NSX_EXT_REGEX: Regex = Regex::new(r"(?i)^\.ns.*$").unwrap();
}

/// Check a path's extension against a shell-style pattern like `.ns*`
/// (case-insensitive, `*` matches anything). Interactive choosers sit
/// outside the crate; this is the boundary they and the `open_*`
/// helpers share.
pub fn extension_matches(path: &Path, pattern: &str) -> bool {
    let ext = match path.extension() {
        Some(e) => format!(".{}", e.to_string_lossy()),
        None => return false,
    };
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    match Regex::new(&format!("(?i)^{}$", escaped)) {
        Ok(re) => re.is_match(&ext),
        Err(_) => false,
    }
}

fn warn_extension(path: &Path, re: &Regex, pattern: &str) {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    if !re.is_match(&ext) {
        warn!(
            "{} does not carry a {} extension, reading anyway",
            path.display(),
            pattern
        );
    }
}

/// Open a NEV event file, warning when the extension is not `.nev`.
pub fn open_nev<P: AsRef<Path>>(path: P) -> Result<NevFile, NevNsxError> {
    warn_extension(path.as_ref(), &NEV_EXT_REGEX, ".nev");
    NevFile::open(path)
}

/// Open an NSx continuous file, warning when the extension does not
/// match `.ns*`.
pub fn open_nsx<P: AsRef<Path>>(path: P) -> Result<NsxFile, NevNsxError> {
    warn_extension(path.as_ref(), &NSX_EXT_REGEX, ".ns*");
    NsxFile::open(path)
}
