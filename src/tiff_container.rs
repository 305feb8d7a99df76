//! [`Container`] implementation over an in-memory TIFF file.
//!
//! The `tiff` crate walks the directory chain and reads tag values. Chunk
//! payloads are sliced straight out of the file so that passthrough gets the
//! exact stored bytes, and decoding is done here per compression scheme.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Arc;

use image::ImageFormat;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, Limits};
use tiff::tags::Tag;

use crate::container::{
    compression, expand_ycbcr_subsampling, photometric, rgba_from_samples, tag, Container,
    Directory, FILLORDER_LSB2MSB,
};
use crate::error::{ConvertError, Result};
use crate::jpeg_splice;

/// A TIFF file held in memory.
pub struct TiffContainer {
    bytes: Arc<[u8]>,
    directories: Vec<Directory>,
}

impl TiffContainer {
    /// Parses every directory in the file.
    ///
    /// Directory tags are read eagerly; chunk data is only touched when asked
    /// for.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let mut decoder =
            Decoder::new(Cursor::new(Arc::clone(&bytes)))?.with_limits(Limits::unlimited());

        let mut directories = Vec::new();
        let mut seen = HashSet::new();
        let mut next = decoder.ifd_pointer();
        while let Some(pointer) = next {
            let index = directories.len();
            if !seen.insert(pointer.0) {
                return Err(ConvertError::container(index, "directory chain loops back"));
            }
            let ifd = decoder.read_directory(pointer)?;
            next = ifd.next();

            let mut tags = HashMap::new();
            for entry in decoder.read_directory_tags(&ifd).tag_iter() {
                let (tag, value) = entry?;
                tags.insert(tag.to_u16(), value);
            }
            directories.push(parse_directory(index, tags)?);
        }

        log::debug!("opened TIFF with {} directories", directories.len());
        Ok(Self { bytes, directories })
    }

    fn dir(&self, index: usize) -> Result<&Directory> {
        self.directories
            .get(index)
            .ok_or_else(|| ConvertError::container(index, "no such directory"))
    }

    fn raw(&self, index: usize, chunk: u32) -> Result<&[u8]> {
        let dir = self.dir(index)?;
        let (offset, count) = match (
            dir.chunk_offsets.get(chunk as usize),
            dir.chunk_byte_counts.get(chunk as usize),
        ) {
            (Some(&offset), Some(&count)) => (offset as usize, count as usize),
            _ => {
                return Err(ConvertError::container(
                    index,
                    format!("chunk {} out of range", chunk),
                ))
            }
        };
        offset
            .checked_add(count)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| {
                ConvertError::container(index, format!("chunk {} extends past end of file", chunk))
            })
    }
}

impl Container for TiffContainer {
    fn directory_count(&mut self) -> Result<usize> {
        Ok(self.directories.len())
    }

    fn directory(&mut self, index: usize) -> Result<Directory> {
        self.dir(index).cloned()
    }

    fn read_raw_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>> {
        Ok(self.raw(index, chunk)?.to_vec())
    }

    fn read_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>> {
        let dir = self.dir(index)?;
        let raw = self.raw(index, chunk)?;
        let (width, _) = dir.chunk_size();
        let rows = dir.chunk_rows(chunk);
        let samples = dir.chunk_samples();

        let mut data = match dir.compression {
            compression::NONE => raw.to_vec(),
            compression::PACKBITS => unpack_bits(raw),
            compression::LZW => weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                .decode(raw)
                .map_err(|e| ConvertError::container(index, format!("LZW: {:?}", e)))?,
            c if compression::is_deflate(c) => {
                let mut out = Vec::new();
                flate2::read::ZlibDecoder::new(raw)
                    .read_to_end(&mut out)
                    .map_err(|e| ConvertError::container(index, format!("Deflate: {}", e)))?;
                out
            }
            compression::CCITT_G4 => decode_g4(dir, index, raw, width, rows)?,
            compression::JPEG => return decode_jpeg(dir, index, raw, width, rows),
            other => {
                return Err(ConvertError::unsupported(
                    index,
                    format!("decoding compression {}", other),
                ))
            }
        };

        if dir.predictor == 2 {
            undo_horizontal_predictor(dir, index, &mut data, width, samples)?;
        } else if dir.predictor != 1 {
            return Err(ConvertError::unsupported(
                index,
                format!("predictor {}", dir.predictor),
            ));
        }

        if dir.photometric == Some(photometric::YCBCR)
            && samples == 3
            && dir.ycbcr_subsampling != (1, 1)
        {
            return expand_ycbcr_subsampling(&data, width, rows, dir.ycbcr_subsampling)
                .ok_or_else(|| ConvertError::container(index, "short YCbCr chunk"));
        }

        let expected = dir.row_bytes(width, samples) * rows as usize;
        if data.len() < expected {
            return Err(ConvertError::container(
                index,
                format!("chunk {} decoded to {} bytes, expected {}", chunk, data.len(), expected),
            ));
        }
        data.truncate(expected);
        Ok(data)
    }

    fn read_rgba_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>> {
        let data = self.read_chunk(index, chunk)?;
        let dir = self.dir(index)?;
        let (width, _) = dir.chunk_size();
        rgba_from_samples(dir, index, &data, width, dir.chunk_rows(chunk))
    }
}

fn parse_directory(index: usize, mut tags: HashMap<u16, Value>) -> Result<Directory> {
    let mut take = |t: u16| tags.remove(&t);
    let bad = |name: &str| ConvertError::container(index, format!("malformed {} tag", name));

    let mut dir = Directory::default();

    dir.width = take(Tag::ImageWidth.to_u16())
        .and_then(first_u64)
        .ok_or_else(|| bad("ImageWidth"))? as u32;
    dir.length = take(Tag::ImageLength.to_u16())
        .and_then(first_u64)
        .ok_or_else(|| bad("ImageLength"))? as u32;

    if let Some(v) = take(Tag::BitsPerSample.to_u16()) {
        dir.bits_per_sample = first_u64(v).ok_or_else(|| bad("BitsPerSample"))? as u16;
    }
    if let Some(v) = take(Tag::SamplesPerPixel.to_u16()) {
        dir.samples_per_pixel = first_u64(v).ok_or_else(|| bad("SamplesPerPixel"))? as u16;
    }
    if let Some(v) = take(Tag::SampleFormat.to_u16()) {
        dir.sample_format = first_u64(v).ok_or_else(|| bad("SampleFormat"))? as u16;
    }
    dir.photometric = take(Tag::PhotometricInterpretation.to_u16())
        .and_then(first_u64)
        .map(|v| v as u16);
    if let Some(v) = take(Tag::Compression.to_u16()).and_then(first_u64) {
        dir.compression = v as u16;
    }
    if let Some(v) = take(Tag::PlanarConfiguration.to_u16()).and_then(first_u64) {
        dir.planar_config = v as u16;
    }
    if let Some(v) = take(Tag::Predictor.to_u16()).and_then(first_u64) {
        dir.predictor = v as u16;
    }
    if let Some(v) = take(Tag::FillOrder.to_u16()).and_then(first_u64) {
        dir.fill_order = v as u16;
    }
    if let Some(v) = take(Tag::Orientation.to_u16()).and_then(first_u64) {
        dir.orientation = v as u16;
    }
    dir.x_resolution = take(Tag::XResolution.to_u16()).and_then(|v| floats(v).first().copied());
    dir.y_resolution = take(Tag::YResolution.to_u16()).and_then(|v| floats(v).first().copied());
    if let Some(v) = take(Tag::ResolutionUnit.to_u16()).and_then(first_u64) {
        dir.resolution_unit = v as u16;
    }
    if let Some(v) = take(Tag::RowsPerStrip.to_u16()).and_then(first_u64) {
        dir.rows_per_strip = v.min(u64::from(u32::MAX)) as u32;
    }

    let tile_width = take(Tag::TileWidth.to_u16()).and_then(first_u64);
    let tile_length = take(Tag::TileLength.to_u16()).and_then(first_u64);
    let (offsets, counts) = match (tile_width, tile_length) {
        (Some(tw), Some(th)) => {
            if tw == 0 || th == 0 {
                return Err(bad("TileWidth/TileLength"));
            }
            dir.tile_size = Some((tw as u32, th as u32));
            (Tag::TileOffsets, Tag::TileByteCounts)
        }
        _ => (Tag::StripOffsets, Tag::StripByteCounts),
    };
    dir.chunk_offsets = take(offsets.to_u16())
        .map(Value::into_u64_vec)
        .transpose()?
        .unwrap_or_default();
    dir.chunk_byte_counts = take(counts.to_u16())
        .map(Value::into_u64_vec)
        .transpose()?
        .unwrap_or_default();
    if dir.chunk_offsets.len() != dir.chunk_byte_counts.len() {
        return Err(bad("chunk offset/byte count"));
    }

    dir.extra_samples = take(Tag::ExtraSamples.to_u16())
        .map(Value::into_u16_vec)
        .transpose()?
        .unwrap_or_default();
    dir.color_map = take(Tag::ColorMap.to_u16())
        .map(Value::into_u16_vec)
        .transpose()?;
    dir.indexed = take(tag::INDEXED).and_then(first_u64) == Some(1);
    dir.ink_set = take(tag::INK_SET).and_then(first_u64).map(|v| v as u16);
    dir.icc_profile = take(Tag::IccProfile.to_u16())
        .map(Value::into_u8_vec)
        .transpose()?
        .filter(|p| !p.is_empty());
    dir.transfer_function = take(tag::TRANSFER_FUNCTION)
        .map(Value::into_u16_vec)
        .transpose()?;
    dir.white_point = take(tag::WHITE_POINT).and_then(|v| floats(v).try_into().ok());
    dir.primary_chromaticities =
        take(tag::PRIMARY_CHROMATICITIES).and_then(|v| floats(v).try_into().ok());
    if let Some(v) = take(tag::YCBCR_SUBSAMPLING) {
        if let [horizontal, vertical] = v.into_u16_vec()?[..] {
            dir.ycbcr_subsampling = (horizontal, vertical);
        }
    }
    dir.ycbcr_coefficients = take(tag::YCBCR_COEFFICIENTS).and_then(|v| floats(v).try_into().ok());
    dir.reference_black_white =
        take(tag::REFERENCE_BLACK_WHITE).and_then(|v| floats(v).try_into().ok());
    dir.jpeg_tables = take(Tag::JPEGTables.to_u16())
        .map(Value::into_u8_vec)
        .transpose()?;
    if let Some(v) = take(tag::PAGE_NUMBER) {
        if let [number, total] = v.into_u16_vec()?[..] {
            dir.page_number = Some((number, total));
        }
    }
    dir.new_subfile_type = take(Tag::NewSubfileType.to_u16())
        .and_then(first_u64)
        .map(|v| v as u32);
    dir.subfile_type = take(Tag::SubfileType.to_u16())
        .and_then(first_u64)
        .map(|v| v as u16);

    dir.software = take(Tag::Software.to_u16()).and_then(ascii);
    dir.artist = take(Tag::Artist.to_u16()).and_then(ascii);
    dir.copyright = take(Tag::Copyright.to_u16()).and_then(ascii);
    dir.document_name = take(tag::DOCUMENT_NAME).and_then(ascii);
    dir.image_description = take(Tag::ImageDescription.to_u16()).and_then(ascii);
    dir.date_time = take(Tag::DateTime.to_u16()).and_then(ascii);

    Ok(dir)
}

fn first_u64(value: Value) -> Option<u64> {
    value.into_u64_vec().ok()?.first().copied()
}

fn ascii(value: Value) -> Option<String> {
    let text = value.into_string().ok()?;
    let text = text.trim_end_matches('\0').to_string();
    (!text.is_empty()).then_some(text)
}

/// Flattens rational, float and integer values into `f32`s.
fn floats(value: Value) -> Vec<f32> {
    match value {
        Value::List(items) => items.into_iter().flat_map(floats).collect(),
        Value::Rational(n, d) if d != 0 => vec![n as f32 / d as f32],
        Value::SRational(n, d) if d != 0 => vec![n as f32 / d as f32],
        Value::Float(v) => vec![v],
        Value::Double(v) => vec![v as f32],
        Value::Byte(v) => vec![f32::from(v)],
        Value::Short(v) => vec![f32::from(v)],
        Value::Unsigned(v) => vec![v as f32],
        _ => Vec::new(),
    }
}

fn unpack_bits(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() * 2);
    let mut i = 0;
    while i < raw.len() {
        let n = raw[i] as i8;
        i += 1;
        if n >= 0 {
            let end = (i + n as usize + 1).min(raw.len());
            out.extend_from_slice(&raw[i..end]);
            i = end;
        } else if n != -128 {
            if let Some(&b) = raw.get(i) {
                out.extend(std::iter::repeat(b).take((1 - n as isize) as usize));
            }
            i += 1;
        }
    }
    out
}

fn undo_horizontal_predictor(
    dir: &Directory,
    index: usize,
    data: &mut [u8],
    width: u32,
    samples: u16,
) -> Result<()> {
    let bits = dir.bits_per_sample;
    if !matches!(bits, 1 | 2 | 4 | 8) {
        return Err(ConvertError::unsupported(
            index,
            format!("horizontal predictor with {} bits per sample", bits),
        ));
    }
    let stride = samples as usize;
    let row = dir.row_bytes(width, samples);
    if row == 0 {
        return Ok(());
    }
    let count = width as usize * stride;
    for line in data.chunks_mut(row) {
        if bits == 8 {
            for i in stride..line.len() {
                line[i] = line[i].wrapping_add(line[i - stride]);
            }
            continue;
        }
        let mask = (1u8 << bits) - 1;
        for i in stride..count.min(line.len() * 8 / bits as usize) {
            let value = packed_sample(line, i, bits).wrapping_add(packed_sample(line, i - stride, bits));
            set_packed_sample(line, i, bits, value & mask);
        }
    }
    Ok(())
}

fn packed_sample(line: &[u8], i: usize, bits: u16) -> u8 {
    let bit = i * bits as usize;
    let shift = 8 - bits as usize - bit % 8;
    (line[bit / 8] >> shift) & ((1u8 << bits) - 1)
}

fn set_packed_sample(line: &mut [u8], i: usize, bits: u16, value: u8) {
    let bit = i * bits as usize;
    let shift = 8 - bits as usize - bit % 8;
    let mask = ((1u8 << bits) - 1) << shift;
    line[bit / 8] = (line[bit / 8] & !mask) | (value << shift);
}

/// Decodes CCITT G4 data into packed rows, 1 bits for black runs.
fn decode_g4(dir: &Directory, index: usize, raw: &[u8], width: u32, rows: u32) -> Result<Vec<u8>> {
    let width16 = u16::try_from(width)
        .map_err(|_| ConvertError::unsupported(index, "G4 image wider than 65535 pixels"))?;
    let rows16 = u16::try_from(rows)
        .map_err(|_| ConvertError::unsupported(index, "G4 chunk taller than 65535 rows"))?;
    let row_bytes = (width as usize).div_ceil(8);
    let mut out = Vec::with_capacity(row_bytes * rows as usize);

    let reverse = dir.fill_order == FILLORDER_LSB2MSB;
    let input = raw.iter().map(|&b| if reverse { b.reverse_bits() } else { b });
    fax::decoder::decode_g4(input, width16, Some(rows16), |transitions| {
        let mut line = vec![0u8; row_bytes];
        for (x, color) in fax::decoder::pels(transitions, width16).enumerate() {
            if color == fax::Color::Black {
                line[x / 8] |= 0x80 >> (x % 8);
            }
        }
        out.extend_from_slice(&line);
    })
    .ok_or_else(|| ConvertError::container(index, "invalid CCITT G4 data"))?;

    // Short data decodes as white.
    out.resize(row_bytes * rows as usize, 0);
    Ok(out)
}

/// Decodes one JPEG chunk into the samples the directory declares.
fn decode_jpeg(dir: &Directory, index: usize, raw: &[u8], width: u32, rows: u32) -> Result<Vec<u8>> {
    let stream = match &dir.jpeg_tables {
        Some(tables) => jpeg_splice::merge_tables(tables, raw)?,
        None => raw.to_vec(),
    };
    let img = image::load_from_memory_with_format(&stream, ImageFormat::Jpeg)
        .map_err(|e| ConvertError::container(index, format!("JPEG: {}", e)))?;

    let (w, h) = (img.width() as usize, img.height() as usize);
    let (width, rows) = (width as usize, rows as usize);
    let samples = dir.samples_per_pixel as usize;
    let pixels: Vec<u8> = match (dir.photometric, samples) {
        (_, 1) => img.to_luma8().into_raw(),
        (Some(photometric::YCBCR), 3) => img
            .to_rgb8()
            .into_raw()
            .chunks_exact(3)
            .flat_map(|p| rgb_to_ycbcr(p[0], p[1], p[2]))
            .collect(),
        (_, 3) => img.to_rgb8().into_raw(),
        _ => {
            return Err(ConvertError::unsupported(
                index,
                format!("decoding {}-sample JPEG data", samples),
            ))
        }
    };

    // Copy into the declared chunk size; tiles may decode larger or smaller.
    let mut out = vec![0u8; width * rows * samples];
    for y in 0..rows.min(h) {
        let n = width.min(w) * samples;
        out[y * width * samples..][..n].copy_from_slice(&pixels[y * w * samples..][..n]);
    }
    Ok(out)
}

fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [clamp(y), clamp(cb), clamp(cr)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    fn gray_tiff(pages: &[(u32, u32, u8)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
            for &(w, h, fill) in pages {
                let data = vec![fill; (w * h) as usize];
                encoder
                    .write_image::<colortype::Gray8>(w, h, &data)
                    .unwrap();
            }
        }
        cursor.into_inner()
    }

    #[test]
    fn test_reads_every_directory() {
        let bytes = gray_tiff(&[(8, 8, 7), (4, 2, 9)]);
        let mut container = TiffContainer::new(bytes).unwrap();
        assert_eq!(container.directory_count().unwrap(), 2);

        let second = container.directory(1).unwrap();
        assert_eq!((second.width, second.length), (4, 2));
        assert_eq!(second.bits_per_sample, 8);
        assert_eq!(second.photometric, Some(photometric::MIN_IS_BLACK));

        let data = container.read_chunk(1, 0).unwrap();
        assert_eq!(data, vec![9; 8]);
    }

    #[test]
    fn test_raw_chunk_matches_byte_count() {
        let bytes = gray_tiff(&[(8, 8, 3)]);
        let mut container = TiffContainer::new(bytes).unwrap();
        let dir = container.directory(0).unwrap();
        let total: u64 = dir.chunk_byte_counts.iter().sum();
        let raw: usize = (0..dir.chunk_count())
            .map(|c| container.read_raw_chunk(0, c).unwrap().len())
            .sum();
        assert_eq!(raw as u64, total);
    }

    #[test]
    fn test_g4_wrapped_strip_decodes() {
        let width = 16u16;
        let mut encoder = fax::encoder::Encoder::new(fax::VecWriter::new());
        for y in 0..4 {
            let line = (0..width).map(|x| {
                if (x + y) % 2 == 0 {
                    fax::Color::Black
                } else {
                    fax::Color::White
                }
            });
            encoder.encode_line(line, width).unwrap();
        }
        let data = encoder.finish().unwrap().finish();
        let bytes = fax::tiff::wrap(&data, u32::from(width), 4);

        let mut container = TiffContainer::new(bytes).unwrap();
        let dir = container.directory(0).unwrap();
        assert_eq!(dir.compression, compression::CCITT_G4);
        assert_eq!(container.read_raw_chunk(0, 0).unwrap(), data);

        let decoded = container.read_chunk(0, 0).unwrap();
        assert_eq!(decoded.len(), 2 * 4);
        assert_eq!(decoded[0], 0b1010_1010);
        assert_eq!(decoded[2], 0b0101_0101);
    }

    #[test]
    fn test_predictor_on_packed_samples() {
        let dir = Directory {
            width: 5,
            length: 1,
            bits_per_sample: 4,
            predictor: 2,
            ..Default::default()
        };
        // Differences 3, 1, 1, 15, 2 accumulate to 3, 4, 5, 4, 6.
        let mut row = vec![0x31, 0x1F, 0x20];
        undo_horizontal_predictor(&dir, 0, &mut row, 5, 1).unwrap();
        assert_eq!(row, vec![0x34, 0x54, 0x60]);

        let bilevel = Directory {
            bits_per_sample: 1,
            ..dir
        };
        let mut row = vec![0b1000_1000];
        undo_horizontal_predictor(&bilevel, 0, &mut row, 5, 1).unwrap();
        assert_eq!(row, vec![0b1111_0000]);
    }

    #[test]
    fn test_unpack_bits() {
        // Literal run of 3, then 0xAA repeated 4 times, then a no-op.
        let packed = [2, 1, 2, 3, 0xFD, 0xAA, 0x80];
        assert_eq!(unpack_bits(&packed), vec![1, 2, 3, 0xAA, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(TiffContainer::new(vec![0u8; 16]).is_err());
    }
}
