//! The source-container boundary.
//!
//! The engine never parses TIFF bytes itself. It works from a [`Directory`]
//! snapshot of the tags it cares about and asks a [`Container`] for chunk data
//! in one of three forms: raw (still compressed), decoded (samples as stored)
//! or RGBA-normalized.

use crate::error::{ConvertError, Result};

/// Photometric interpretation values.
pub mod photometric {
    pub const MIN_IS_WHITE: u16 = 0;
    pub const MIN_IS_BLACK: u16 = 1;
    pub const RGB: u16 = 2;
    pub const PALETTE: u16 = 3;
    pub const MASK: u16 = 4;
    pub const SEPARATED: u16 = 5;
    pub const YCBCR: u16 = 6;
    pub const CIELAB: u16 = 8;
    pub const ICCLAB: u16 = 9;
    pub const ITULAB: u16 = 10;
    pub const LOGL: u16 = 32844;
    pub const LOGLUV: u16 = 32845;
}

/// Compression scheme values.
pub mod compression {
    pub const NONE: u16 = 1;
    pub const CCITT_G4: u16 = 4;
    pub const LZW: u16 = 5;
    pub const OJPEG: u16 = 6;
    pub const JPEG: u16 = 7;
    pub const ADOBE_DEFLATE: u16 = 8;
    pub const PACKBITS: u16 = 32773;
    pub const DEFLATE: u16 = 32946;

    pub fn is_deflate(value: u16) -> bool {
        value == ADOBE_DEFLATE || value == DEFLATE
    }
}

/// Tag numbers the `tiff` crate has no named variant for.
pub mod tag {
    pub const DOCUMENT_NAME: u16 = 269;
    pub const PAGE_NUMBER: u16 = 297;
    pub const TRANSFER_FUNCTION: u16 = 301;
    pub const WHITE_POINT: u16 = 318;
    pub const PRIMARY_CHROMATICITIES: u16 = 319;
    pub const INK_SET: u16 = 332;
    pub const INDEXED: u16 = 346;
    pub const YCBCR_COEFFICIENTS: u16 = 529;
    pub const YCBCR_SUBSAMPLING: u16 = 530;
    pub const REFERENCE_BLACK_WHITE: u16 = 532;
}

pub const EXTRASAMPLE_ASSOCIATED_ALPHA: u16 = 1;
pub const EXTRASAMPLE_UNASSOCIATED_ALPHA: u16 = 2;
pub const INKSET_CMYK: u16 = 1;
pub const FILETYPE_PAGE: u32 = 0x2;
pub const RESUNIT_NONE: u16 = 1;
pub const RESUNIT_INCH: u16 = 2;
pub const RESUNIT_CENTIMETER: u16 = 3;
pub const PLANAR_CONTIG: u16 = 1;
pub const PLANAR_SEPARATE: u16 = 2;
pub const FILLORDER_LSB2MSB: u16 = 2;

/// Typed snapshot of one image directory.
///
/// Defaults follow the TIFF 6.0 tag defaults, so a directory missing e.g.
/// `ResolutionUnit` reads as inches.
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    pub width: u32,
    pub length: u32,
    pub bits_per_sample: u16,
    pub samples_per_pixel: u16,
    pub sample_format: u16,
    pub photometric: Option<u16>,
    pub compression: u16,
    pub planar_config: u16,
    pub predictor: u16,
    pub fill_order: u16,
    pub orientation: u16,
    pub x_resolution: Option<f32>,
    pub y_resolution: Option<f32>,
    pub resolution_unit: u16,
    pub rows_per_strip: u32,
    /// Tile width and length, `None` for stripped images.
    pub tile_size: Option<(u32, u32)>,
    pub chunk_offsets: Vec<u64>,
    pub chunk_byte_counts: Vec<u64>,
    pub extra_samples: Vec<u16>,
    pub color_map: Option<Vec<u16>>,
    pub indexed: bool,
    pub ink_set: Option<u16>,
    pub icc_profile: Option<Vec<u8>>,
    pub transfer_function: Option<Vec<u16>>,
    pub white_point: Option<[f32; 2]>,
    pub primary_chromaticities: Option<[f32; 6]>,
    pub ycbcr_subsampling: (u16, u16),
    pub ycbcr_coefficients: Option<[f32; 3]>,
    pub reference_black_white: Option<[f32; 6]>,
    pub jpeg_tables: Option<Vec<u8>>,
    pub page_number: Option<(u16, u16)>,
    pub new_subfile_type: Option<u32>,
    pub subfile_type: Option<u16>,
    pub software: Option<String>,
    pub artist: Option<String>,
    pub copyright: Option<String>,
    pub document_name: Option<String>,
    pub image_description: Option<String>,
    pub date_time: Option<String>,
}

impl Default for Directory {
    fn default() -> Self {
        Self {
            width: 0,
            length: 0,
            bits_per_sample: 1,
            samples_per_pixel: 1,
            sample_format: 1,
            photometric: None,
            compression: compression::NONE,
            planar_config: PLANAR_CONTIG,
            predictor: 1,
            fill_order: 1,
            orientation: 1,
            x_resolution: None,
            y_resolution: None,
            resolution_unit: RESUNIT_INCH,
            rows_per_strip: u32::MAX,
            tile_size: None,
            chunk_offsets: Vec::new(),
            chunk_byte_counts: Vec::new(),
            extra_samples: Vec::new(),
            color_map: None,
            indexed: false,
            ink_set: None,
            icc_profile: None,
            transfer_function: None,
            white_point: None,
            primary_chromaticities: None,
            ycbcr_subsampling: (2, 2),
            ycbcr_coefficients: None,
            reference_black_white: None,
            jpeg_tables: None,
            page_number: None,
            new_subfile_type: None,
            subfile_type: None,
            software: None,
            artist: None,
            copyright: None,
            document_name: None,
            image_description: None,
            date_time: None,
        }
    }
}

impl Directory {
    pub fn is_tiled(&self) -> bool {
        self.tile_size.is_some()
    }

    /// Number of chunks in the file, counting every plane.
    pub fn chunk_count(&self) -> u32 {
        self.chunk_offsets.len() as u32
    }

    /// Chunks making up one plane of the image.
    pub fn chunks_per_plane(&self) -> u32 {
        let planes = if self.planar_config == PLANAR_SEPARATE {
            u32::from(self.samples_per_pixel.max(1))
        } else {
            1
        };
        self.chunk_count() / planes
    }

    /// Rows per strip, clamped to the image length.
    pub fn strip_rows(&self) -> u32 {
        self.rows_per_strip.clamp(1, self.length.max(1))
    }

    /// Full chunk size: tile size for tiled images, strip height otherwise.
    pub fn chunk_size(&self) -> (u32, u32) {
        match self.tile_size {
            Some(size) => size,
            None => (self.width, self.strip_rows()),
        }
    }

    /// Whether the right or bottom tiles hang past the image.
    pub fn has_partial_tiles(&self) -> bool {
        match self.tile_size {
            Some((tw, th)) if tw > 0 && th > 0 => self.width % tw != 0 || self.length % th != 0,
            _ => false,
        }
    }

    pub fn tiles_across(&self) -> u32 {
        match self.tile_size {
            Some((tw, _)) if tw > 0 => self.width.div_ceil(tw),
            _ => 1,
        }
    }

    pub fn tiles_down(&self) -> u32 {
        match self.tile_size {
            Some((_, th)) if th > 0 => self.length.div_ceil(th),
            _ => 1,
        }
    }

    /// Rows actually covered by a chunk. Tiles always report the full tile
    /// height, the last strip reports what is left of the image.
    pub fn chunk_rows(&self, chunk: u32) -> u32 {
        match self.tile_size {
            Some((_, th)) => th,
            None => {
                let rows = self.strip_rows();
                let strip = chunk % self.chunks_per_plane().max(1);
                self.length.saturating_sub(strip * rows).min(rows)
            }
        }
    }

    /// Samples stored per pixel in one chunk of this image.
    pub fn chunk_samples(&self) -> u16 {
        if self.planar_config == PLANAR_SEPARATE {
            1
        } else {
            self.samples_per_pixel
        }
    }

    /// Byte length of one row holding `width` pixels of `samples` samples.
    pub fn row_bytes(&self, width: u32, samples: u16) -> usize {
        (width as usize * samples as usize * self.bits_per_sample as usize).div_ceil(8)
    }
}

/// Access to the pages of a source image container.
pub trait Container {
    /// Number of image directories in the container.
    fn directory_count(&mut self) -> Result<usize>;

    /// Tag snapshot of directory `index`.
    fn directory(&mut self, index: usize) -> Result<Directory>;

    /// Undecoded bytes of one strip or tile.
    fn read_raw_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>>;

    /// Decoded samples of one strip or tile, in the stored layout.
    ///
    /// Tiles are returned at full tile size including padding. YCbCr data is
    /// returned with chroma subsampling expanded to one Y/Cb/Cr triple per
    /// pixel.
    fn read_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>>;

    /// One strip or tile converted to 8-bit RGBA.
    fn read_rgba_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>>;
}

/// One page held by a [`MemoryContainer`].
#[derive(Debug, Clone)]
pub struct MemoryPage {
    pub directory: Directory,
    pub raw_chunks: Vec<Vec<u8>>,
    pub decoded_chunks: Vec<Vec<u8>>,
}

/// A container whose chunks are already in memory.
///
/// Decoded chunks follow the [`Container::read_chunk`] layout. When a page is
/// added through [`MemoryContainer::push_uncompressed`] the raw and decoded
/// forms are the same bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    pages: Vec<MemoryPage>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an uncompressed page, filling in chunk offsets and byte counts.
    pub fn push_uncompressed(&mut self, mut directory: Directory, chunks: Vec<Vec<u8>>) {
        directory.compression = compression::NONE;
        fill_chunk_table(&mut directory, &chunks);
        self.pages.push(MemoryPage {
            directory,
            raw_chunks: chunks.clone(),
            decoded_chunks: chunks,
        });
    }

    /// Adds a page with separate compressed and decoded forms of each chunk.
    pub fn push_encoded(
        &mut self,
        mut directory: Directory,
        raw_chunks: Vec<Vec<u8>>,
        decoded_chunks: Vec<Vec<u8>>,
    ) {
        fill_chunk_table(&mut directory, &raw_chunks);
        self.pages.push(MemoryPage {
            directory,
            raw_chunks,
            decoded_chunks,
        });
    }

    fn page(&self, index: usize) -> Result<&MemoryPage> {
        self.pages
            .get(index)
            .ok_or_else(|| ConvertError::container(index, "no such directory"))
    }

    fn chunk<'a>(chunks: &'a [Vec<u8>], index: usize, chunk: u32) -> Result<&'a Vec<u8>> {
        chunks
            .get(chunk as usize)
            .ok_or_else(|| ConvertError::container(index, format!("no chunk {}", chunk)))
    }
}

fn fill_chunk_table(directory: &mut Directory, chunks: &[Vec<u8>]) {
    let mut offset = 8u64;
    directory.chunk_offsets.clear();
    directory.chunk_byte_counts.clear();
    for chunk in chunks {
        directory.chunk_offsets.push(offset);
        directory.chunk_byte_counts.push(chunk.len() as u64);
        offset += chunk.len() as u64;
    }
}

impl Container for MemoryContainer {
    fn directory_count(&mut self) -> Result<usize> {
        Ok(self.pages.len())
    }

    fn directory(&mut self, index: usize) -> Result<Directory> {
        Ok(self.page(index)?.directory.clone())
    }

    fn read_raw_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>> {
        let page = self.page(index)?;
        Ok(Self::chunk(&page.raw_chunks, index, chunk)?.clone())
    }

    fn read_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>> {
        let page = self.page(index)?;
        Ok(Self::chunk(&page.decoded_chunks, index, chunk)?.clone())
    }

    fn read_rgba_chunk(&mut self, index: usize, chunk: u32) -> Result<Vec<u8>> {
        let page = self.page(index)?;
        let data = Self::chunk(&page.decoded_chunks, index, chunk)?;
        let (width, _) = page.directory.chunk_size();
        let rows = page.directory.chunk_rows(chunk);
        rgba_from_samples(&page.directory, index, data, width, rows)
    }
}

/// Converts decoded 8-bit samples of one chunk to RGBA.
///
/// Handles the photometrics an RGBA read is asked for: YCbCr (already
/// expanded to 4:4:4), RGB with or without alpha, and grayscale.
pub(crate) fn rgba_from_samples(
    dir: &Directory,
    index: usize,
    data: &[u8],
    width: u32,
    rows: u32,
) -> Result<Vec<u8>> {
    if dir.bits_per_sample != 8 {
        return Err(ConvertError::unsupported(
            index,
            format!("RGBA read of {}-bit samples", dir.bits_per_sample),
        ));
    }
    let pixels = width as usize * rows as usize;
    let samples = dir.samples_per_pixel.max(1) as usize;
    if data.len() < pixels * samples {
        return Err(ConvertError::container(
            index,
            format!("chunk holds {} bytes, expected {}", data.len(), pixels * samples),
        ));
    }

    let mut out = Vec::with_capacity(pixels * 4);
    match dir.photometric {
        Some(photometric::YCBCR) if samples >= 3 => {
            let converter = YCbCrConverter::new(dir);
            for px in data.chunks_exact(samples).take(pixels) {
                let [r, g, b] = converter.to_rgb(px[0], px[1], px[2]);
                out.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Some(photometric::RGB) if samples >= 3 => {
            for px in data.chunks_exact(samples).take(pixels) {
                let alpha = if samples > 3 { px[3] } else { 255 };
                out.extend_from_slice(&[px[0], px[1], px[2], alpha]);
            }
        }
        Some(photometric::MIN_IS_BLACK) | Some(photometric::MIN_IS_WHITE) => {
            let invert = dir.photometric == Some(photometric::MIN_IS_WHITE);
            for px in data.chunks_exact(samples).take(pixels) {
                let v = if invert { 255 - px[0] } else { px[0] };
                out.extend_from_slice(&[v, v, v, 255]);
            }
        }
        other => {
            return Err(ConvertError::unsupported(
                index,
                format!("RGBA read of photometric {:?}", other),
            ))
        }
    }
    Ok(out)
}

/// YCbCr to RGB conversion honoring `YCbCrCoefficients` and
/// `ReferenceBlackWhite`.
pub(crate) struct YCbCrConverter {
    luma: [f32; 3],
    reference: [f32; 6],
}

impl YCbCrConverter {
    pub(crate) fn new(dir: &Directory) -> Self {
        Self {
            luma: dir.ycbcr_coefficients.unwrap_or([0.299, 0.587, 0.114]),
            reference: dir
                .reference_black_white
                .unwrap_or([0.0, 255.0, 128.0, 255.0, 128.0, 255.0]),
        }
    }

    pub(crate) fn to_rgb(&self, y: u8, cb: u8, cr: u8) -> [u8; 3] {
        let [lr, lg, lb] = self.luma;
        let r = &self.reference;
        let span = |lo: f32, hi: f32| if (hi - lo).abs() < f32::EPSILON { 1.0 } else { hi - lo };

        let y = (f32::from(y) - r[0]) * 255.0 / span(r[0], r[1]);
        let cb = (f32::from(cb) - r[2]) * 127.0 / span(r[2], r[3]);
        let cr = (f32::from(cr) - r[4]) * 127.0 / span(r[4], r[5]);

        let red = y + cr * (2.0 - 2.0 * lr);
        let blue = y + cb * (2.0 - 2.0 * lb);
        let green = if lg.abs() < f32::EPSILON {
            y
        } else {
            (y - lb * blue - lr * red) / lg
        };
        let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
        [clamp(red), clamp(green), clamp(blue)]
    }
}

/// Expands subsampled YCbCr data units into one Y/Cb/Cr triple per pixel.
///
/// Each data unit holds `h * v` luma samples followed by one Cb and one Cr.
pub(crate) fn expand_ycbcr_subsampling(
    data: &[u8],
    width: u32,
    rows: u32,
    subsampling: (u16, u16),
) -> Option<Vec<u8>> {
    let (h, v) = (subsampling.0.max(1) as usize, subsampling.1.max(1) as usize);
    let (width, rows) = (width as usize, rows as usize);
    if h == 1 && v == 1 {
        return data.get(..width * rows * 3).map(<[u8]>::to_vec);
    }

    let units_across = width.div_ceil(h);
    let units_down = rows.div_ceil(v);
    let unit_len = h * v + 2;
    if data.len() < units_across * units_down * unit_len {
        return None;
    }

    let mut out = vec![0u8; width * rows * 3];
    for uy in 0..units_down {
        for ux in 0..units_across {
            let unit = &data[(uy * units_across + ux) * unit_len..][..unit_len];
            let (cb, cr) = (unit[h * v], unit[h * v + 1]);
            for dy in 0..v {
                for dx in 0..h {
                    let (x, y) = (ux * h + dx, uy * v + dy);
                    if x >= width || y >= rows {
                        continue;
                    }
                    let at = (y * width + x) * 3;
                    out[at] = unit[dy * h + dx];
                    out[at + 1] = cb;
                    out[at + 2] = cr;
                }
            }
        }
    }
    Some(out)
}
