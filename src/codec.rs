//! Output encoders for re-encoded images.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{ConvertError, Result};
use crate::options::OutputCompression;
use crate::pipeline::SampleShape;

/// Encoder settings taken from the options and the page plan.
#[derive(Debug, Clone, Copy)]
pub struct EncodeSettings {
    pub quality: u8,
    pub deflate_level: u32,
    pub predictor: bool,
    /// Samples are YCbCr and go into the JPEG as-is.
    pub ycbcr: bool,
}

#[derive(Debug, Clone)]
pub struct Encoded {
    pub data: Vec<u8>,
    /// Horizontal differencing was applied before compression.
    pub predictor: bool,
}

/// Encodes `data` laid out as `shape` with `codec`.
pub fn encode(
    codec: OutputCompression,
    data: &[u8],
    shape: &SampleShape,
    settings: &EncodeSettings,
) -> Result<Encoded> {
    match codec {
        OutputCompression::None => Ok(Encoded {
            data: data.to_vec(),
            predictor: false,
        }),
        OutputCompression::Deflate => {
            let predictor = settings.predictor && shape.bits == 8;
            let data = if predictor {
                deflate(&horizontal_difference(data, shape), settings.deflate_level)?
            } else {
                deflate(data, settings.deflate_level)?
            };
            Ok(Encoded { data, predictor })
        }
        OutputCompression::Jpeg => Ok(Encoded {
            data: jpeg(data, shape, settings)?,
            predictor: false,
        }),
        OutputCompression::G4 => Ok(Encoded {
            data: g4(data, shape)?,
            predictor: false,
        }),
    }
}

fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// TIFF predictor 2 on 8-bit samples, row by row.
fn horizontal_difference(data: &[u8], shape: &SampleShape) -> Vec<u8> {
    let mut out = data.to_vec();
    let samples = usize::from(shape.samples);
    for row in out.chunks_mut(shape.row_bytes().max(1)) {
        for i in (samples..row.len()).rev() {
            row[i] = row[i].wrapping_sub(row[i - samples]);
        }
    }
    out
}

fn jpeg(data: &[u8], shape: &SampleShape, settings: &EncodeSettings) -> Result<Vec<u8>> {
    if shape.bits != 8 {
        return Err(ConvertError::Encode(format!(
            "JPEG needs 8-bit samples, got {}",
            shape.bits
        )));
    }
    let color = match (shape.samples, settings.ycbcr) {
        (1, _) => jpeg_encoder::ColorType::Luma,
        (3, true) => jpeg_encoder::ColorType::Ycbcr,
        (3, false) => jpeg_encoder::ColorType::Rgb,
        (4, _) => jpeg_encoder::ColorType::Cmyk,
        (n, _) => {
            return Err(ConvertError::Encode(format!(
                "JPEG can't carry {} samples per pixel",
                n
            )))
        }
    };
    let (width, height) = jpeg_size(shape)?;

    let mut out = Vec::new();
    jpeg_encoder::Encoder::new(&mut out, settings.quality)
        .encode(data, width, height, color)
        .map_err(|e| ConvertError::Encode(format!("JPEG: {}", e)))?;
    Ok(out)
}

fn jpeg_size(shape: &SampleShape) -> Result<(u16, u16)> {
    match (u16::try_from(shape.width), u16::try_from(shape.rows)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(ConvertError::Encode(format!(
            "{}x{} exceeds the JPEG size limit",
            shape.width, shape.rows
        ))),
    }
}

/// CCITT Group 4 encoding of 1-bit samples; a set bit is coded black.
fn g4(data: &[u8], shape: &SampleShape) -> Result<Vec<u8>> {
    if shape.bits != 1 || shape.samples != 1 {
        return Err(ConvertError::Encode(format!(
            "G4 needs 1-bit samples, got {} x {} bits",
            shape.samples, shape.bits
        )));
    }
    let width = u16::try_from(shape.width)
        .map_err(|_| ConvertError::Encode(format!("width {} too large for G4", shape.width)))?;

    let mut encoder = fax::encoder::Encoder::new(fax::VecWriter::new());
    for row in data.chunks(shape.row_bytes()).take(shape.rows as usize) {
        let pels = (0..usize::from(width)).map(|x| {
            if row[x / 8] & (0x80 >> (x % 8)) != 0 {
                fax::Color::Black
            } else {
                fax::Color::White
            }
        });
        encoder
            .encode_line(pels, width)
            .map_err(|e| ConvertError::Encode(format!("G4: {:?}", e)))?;
    }
    let writer = encoder
        .finish()
        .map_err(|e| ConvertError::Encode(format!("G4: {:?}", e)))?;
    Ok(writer.finish())
}
