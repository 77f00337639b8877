use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NevNsxError {
    #[error("IO Error")]
    IOError(#[from] std::io::Error),
    #[error("Unexpected end of file reading {1}, short {0} bytes")]
    UnexpectedEof(usize, &'static str),
    #[error("File type `{0}` matches no recognized family")]
    UnknownFileType(String),
    #[error("Unknown extended header tag `{0}`")]
    UnknownHeaderKind(String),
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Allocation of {0} bytes exceeds available memory")]
    OutOfMemory(usize),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Refusing to overwrite {0:?} without confirmation")]
    OverwriteRefused(PathBuf),
    #[error("Header field `{0}` missing or of unexpected type")]
    FieldAccess(&'static str),
}
