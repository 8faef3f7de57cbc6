//! Error types shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The input extension or internal format is not one this tool reads.
    #[error("unsupported format: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// The file opened but its header is unusable (bad magic, zero points,
    /// inverted bounds).
    #[error("corrupt header in {path}: {message}")]
    CorruptHeader { path: PathBuf, message: String },

    /// A single point record failed to decode. The stream is truncated at
    /// the current index; earlier points stand.
    #[error("point record error at index {index}: {message}")]
    Point { index: u64, message: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The bounds pass could not open a single input file.
    #[error("no usable input files")]
    NoUsableInput,

    /// Writer-side failure that is fatal for the current file.
    #[error("write error for {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn corrupt_header(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::CorruptHeader {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Write {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Per-point errors are downgraded to warnings by the worker.
    pub fn is_point_error(&self) -> bool {
        matches!(self, Error::Point { .. })
    }
}
