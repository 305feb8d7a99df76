//! TIFF to PDF Converter Library
//!
//! Core logic for turning (multi-page) TIFF files into PDF documents. Shared
//! between CLI and WASM targets.
//!
//! Compressed data the PDF format can carry directly (CCITT G4, JPEG,
//! Deflate) is copied without decoding; everything else is decoded,
//! transformed and re-encoded.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub mod classify;
pub mod codec;
pub mod container;
pub mod convert;
pub mod error;
pub mod geometry;
pub mod jpeg_splice;
pub mod options;
pub mod pdf;
pub mod pipeline;
pub mod scanner;
pub mod tiff_container;
pub mod writer;

pub use container::{Container, Directory, MemoryContainer};
pub use convert::{convert, measure, ConvertResult, PageReport};
pub use error::{ConvertError, Result};
pub use options::{ConvertOptions, OutputCompression, PageSize};
pub use tiff_container::TiffContainer;

/// Convert TIFF bytes and return the PDF bytes
pub fn convert_bytes(
    tiff_bytes: &[u8],
    options: &ConvertOptions,
) -> Result<(Vec<u8>, ConvertResult)> {
    let mut container = TiffContainer::new(tiff_bytes.to_vec())?;
    let mut output_bytes = Vec::new();
    let result = convert(&mut container, &mut output_bytes, options)?;
    Ok((output_bytes, result))
}

/// File-based operations (not available in WASM)
#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::fs::File;
    use std::io::BufWriter;
    use std::path::Path;

    /// Convert a TIFF file into a PDF file
    ///
    /// The output file is removed again if the conversion fails.
    pub fn convert_file(
        input_path: &Path,
        output_path: &Path,
        options: &ConvertOptions,
    ) -> Result<ConvertResult> {
        options.validate()?;
        let bytes = std::fs::read(input_path)?;
        log::debug!("read {} bytes from {:?}", bytes.len(), input_path);
        let mut container = TiffContainer::new(bytes)?;

        let file = File::create(output_path)?;
        match convert(&mut container, BufWriter::new(file), options) {
            Ok(result) => Ok(result),
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(output_path) {
                    log::warn!("can't remove partial output {:?}: {}", output_path, remove);
                }
                Err(e)
            }
        }
    }
}
