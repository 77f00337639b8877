use serde::{Deserialize, Serialize};
use std::fmt;

use crate::nevnsx_error::NevNsxError;

/// File format revision, a `(major, minor)` pair read from the basic header.
/// Ordering is lexicographic, so `FileSpec::new(2, 3) < FileSpec::new(3, 0)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileSpec {
    pub major: u8,
    pub minor: u8,
}

impl FileSpec {
    pub fn new(major: u8, minor: u8) -> FileSpec {
        FileSpec { major, minor }
    }
}

impl fmt::Display for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Per-revision policy, resolved once at open. Timestamp width, header
/// layout and segmentation rule all flow from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRevision {
    /// `NEURALSG` files, no extended headers, one implicit segment.
    Legacy21,
    V22,
    V23,
    V30,
    /// Spec 3.x stream with one PTP-timestamped sample per packet.
    V3xPtp,
}

impl FileRevision {
    /// Resolve the revision from the header version pair. PTP detection
    /// happens later, by scanning the packet stream, so 3.x initially
    /// maps to `V30`.
    pub fn from_spec(spec: FileSpec) -> Result<FileRevision, NevNsxError> {
        match (spec.major, spec.minor) {
            (2, 1) => Ok(FileRevision::Legacy21),
            (2, 2) => Ok(FileRevision::V22),
            (2, 3) => Ok(FileRevision::V23),
            (3, _) => Ok(FileRevision::V30),
            _ => Err(NevNsxError::UnknownFileType(spec.to_string())),
        }
    }

    /// Width in bytes of the timestamp in a segment packet header.
    pub fn timestamp_size(&self) -> usize {
        match self {
            FileRevision::Legacy21 | FileRevision::V22 | FileRevision::V23 => 4,
            FileRevision::V30 | FileRevision::V3xPtp => 8,
        }
    }

    pub fn is_ptp(&self) -> bool {
        matches!(self, FileRevision::V3xPtp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_ordering() {
        assert!(FileSpec::new(2, 1) < FileSpec::new(2, 3));
        assert!(FileSpec::new(2, 3) < FileSpec::new(3, 0));
        assert_eq!(FileSpec::new(2, 3).to_string(), "2.3");
    }

    #[test]
    fn revision_dispatch() {
        assert_eq!(
            FileRevision::from_spec(FileSpec::new(2, 2)).unwrap(),
            FileRevision::V22
        );
        assert_eq!(
            FileRevision::from_spec(FileSpec::new(3, 5)).unwrap(),
            FileRevision::V30
        );
        assert!(FileRevision::from_spec(FileSpec::new(1, 0)).is_err());
        assert_eq!(FileRevision::V23.timestamp_size(), 4);
        assert_eq!(FileRevision::V30.timestamp_size(), 8);
    }
}
