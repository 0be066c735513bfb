//! Error types for CASC reader operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The container at the given path could not be opened. Carries the
    /// underlying platform error for diagnostics.
    #[error("Failed to open storage at {path:?}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The locator (path, key, or data ID) did not resolve to any file.
    /// Expected during normal use; callers branch on it.
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Operation attempted on a poisoned or exhausted resource.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid index format: {0}")]
    InvalidIndexFormat(String),

    #[error("Invalid root manifest format: {0}")]
    InvalidManifestFormat(String),

    #[error("Invalid archive format: {0}")]
    InvalidArchiveFormat(String),

    #[error("Invalid build info: {0}")]
    InvalidBuildInfo(String),

    /// Two-phase info query: the supplied buffer is too small. `required`
    /// is the exact size a retry must provide.
    #[error("Buffer too small: {required} bytes required")]
    InsufficientBuffer { required: usize },

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

pub type Result<T> = std::result::Result<T, CascError>;

impl CascError {
    /// The platform error code carried by an open failure, if any.
    pub fn os_error_code(&self) -> Option<i32> {
        match self {
            Self::OpenFailed { source, .. } => source.raw_os_error(),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
