//! Error type shared by the conversion engine, the TIFF adapter and the writer.

use thiserror::Error;

/// Errors that abort a conversion.
///
/// Every variant is fatal: the engine never emits a cross-reference table
/// once one of these has been raised.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("JPEG quality must be between 1 and 100")]
    InvalidQuality,

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("input contains no pages")]
    NoPages,

    #[error("no support for directory {directory}: {reason}")]
    Unsupported { directory: usize, reason: String },

    #[error("can't read directory {directory}: {reason}")]
    Container { directory: usize, reason: String },

    #[error("TIFF decoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("can't process JPEG data: {0}")]
    Jpeg(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("PDF serialization failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("object numbering mismatch: expected object {expected}, got {actual}")]
    ObjectNumbering { expected: u32, actual: u32 },

    #[error("writer already failed, refusing further output")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub(crate) fn unsupported(directory: usize, reason: impl Into<String>) -> Self {
        ConvertError::Unsupported {
            directory,
            reason: reason.into(),
        }
    }

    pub(crate) fn container(directory: usize, reason: impl Into<String>) -> Self {
        ConvertError::Container {
            directory,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
