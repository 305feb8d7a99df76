//! Per-page decisions.
//!
//! [`classify`] looks at one directory and settles everything the writer
//! needs to know before emitting the page: the output color space, whether
//! compressed data can be copied as-is, the output codec, and which sample
//! transforms have to run when it can't.

use crate::container::{
    compression, photometric, Directory, EXTRASAMPLE_ASSOCIATED_ALPHA,
    EXTRASAMPLE_UNASSOCIATED_ALPHA, INKSET_CMYK, PLANAR_CONTIG, PLANAR_SEPARATE,
};
use crate::error::{ConvertError, Result};
use crate::options::{ConvertOptions, OutputCompression};

/// D50 white point chromaticity.
pub const D50: [f32; 2] = [0.3457, 0.3585];

const CIELAB_RANGE: [i32; 4] = [-127, 127, -127, 127];
const ICCLAB_RANGE: [i32; 4] = [0, 255, 0, 255];
const ITULAB_RANGE: [i32; 4] = [-85, 85, -75, 124];

/// The device family of the output color space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorBase {
    Bilevel,
    Gray,
    Rgb,
    Cmyk,
    Lab {
        range: [i32; 4],
        /// White point as XYZ with Y = 1.
        white_point: [f32; 3],
    },
}

impl ColorBase {
    pub fn components(&self) -> u16 {
        match self {
            ColorBase::Bilevel | ColorBase::Gray => 1,
            ColorBase::Rgb | ColorBase::Lab { .. } => 3,
            ColorBase::Cmyk => 4,
        }
    }

    /// Device space used as the ICC alternate.
    pub fn device_name(&self) -> &'static str {
        match self {
            ColorBase::Bilevel | ColorBase::Gray => "DeviceGray",
            ColorBase::Rgb | ColorBase::Lab { .. } => "DeviceRGB",
            ColorBase::Cmyk => "DeviceCMYK",
        }
    }

    pub fn is_gray(&self) -> bool {
        matches!(self, ColorBase::Bilevel | ColorBase::Gray)
    }
}

/// Lookup table for indexed images, `channels` bytes per entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub entries: Vec<u8>,
    pub channels: u8,
}

impl Palette {
    pub fn len(&self) -> usize {
        self.entries.len() / usize::from(self.channels.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest valid index.
    pub fn hival(&self) -> usize {
        self.len().saturating_sub(1)
    }
}

/// CIE-based calibration derived from the white point tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    Gray {
        white_point: [f32; 3],
        gamma: f32,
    },
    Rgb {
        white_point: [f32; 3],
        gamma: f32,
        matrix: [f32; 9],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorSpace {
    pub base: ColorBase,
    pub palette: Option<Palette>,
    pub calibration: Option<Calibration>,
    pub icc: bool,
}

impl ColorSpace {
    fn plain(base: ColorBase) -> Self {
        Self {
            base,
            palette: None,
            calibration: None,
            icc: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    /// Source compressed bytes are copied unchanged.
    Raw,
    /// Samples are decoded, transformed and encoded again.
    Recode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Straight,
    Premultiplied,
}

/// Sample transforms, listed in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplePlan {
    pub planar_to_contig: bool,
    pub realize_palette: bool,
    pub alpha: Option<AlphaMode>,
    pub ycbcr_to_rgb: bool,
    pub lab_signed_to_unsigned: bool,
}

impl SamplePlan {
    pub fn is_empty(&self) -> bool {
        *self == SamplePlan::default()
    }
}

/// Everything decided about one page before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    /// Source directory index.
    pub index: usize,
    /// The directory with out-of-range tag values replaced by defaults.
    pub directory: Directory,
    pub color: ColorSpace,
    /// Samples are stored with 0 meaning full intensity.
    pub invert: bool,
    pub mode: TranscodeMode,
    pub codec: OutputCompression,
    pub stages: SamplePlan,
    /// Bits per component of the emitted image data.
    pub bits: u16,
    /// Components per pixel of the emitted image data.
    pub components: u16,
    /// JPEG output encodes YCbCr samples directly.
    pub ycbcr_jpeg: bool,
    /// Palette expanded into the samples by the realize stage.
    pub realized_palette: Option<Palette>,
    /// Transfer function tables, one or three.
    pub transfer: Vec<Vec<u16>>,
    pub icc_profile: Option<Vec<u8>>,
}

impl PagePlan {
    /// Objects written for this page beyond the fixed page, contents and
    /// image objects.
    pub fn extra(&self) -> u32 {
        let mut extra = 0;
        if self.color.palette.is_some() {
            extra += 1;
        }
        if self.color.icc {
            extra += 1;
        }
        if !self.transfer.is_empty() {
            extra += 1 + self.transfer.len() as u32;
        }
        extra
    }

    /// Minimum PDF minor version this page needs.
    pub fn pdf_minor(&self) -> u8 {
        let mut minor = 1;
        if self.codec == OutputCompression::Deflate || !self.transfer.is_empty() {
            minor = 2;
        }
        if self.color.icc {
            minor = 3;
        }
        minor
    }

    /// Images on the page: one per tile, or one for a stripped image.
    pub fn tile_count(&self) -> u32 {
        if self.directory.is_tiled() {
            self.directory.tiles_across() * self.directory.tiles_down()
        } else {
            1
        }
    }
}

/// What the photometric interpretation alone implies.
struct Interpretation {
    base: ColorBase,
    palette: Option<Palette>,
    invert: bool,
    alpha: Option<AlphaMode>,
    ycbcr: bool,
    lab_transform: bool,
}

impl Interpretation {
    fn new(base: ColorBase) -> Self {
        Self {
            base,
            palette: None,
            invert: false,
            alpha: None,
            ycbcr: false,
            lab_transform: false,
        }
    }
}

/// Classifies directory `index` for output.
pub fn classify(dir: &Directory, index: usize, options: &ConvertOptions) -> Result<PagePlan> {
    let dir = normalize(dir, index)?;
    let info = interpret(&dir, index)?;

    let planar = dir.planar_config == PLANAR_SEPARATE;
    if planar && info.ycbcr {
        return Err(ConvertError::unsupported(index, "planar-separate YCbCr"));
    }

    let mode = if options.passthrough && can_pass_through(&dir, &info, planar) {
        TranscodeMode::Raw
    } else {
        TranscodeMode::Recode
    };

    let codec = match mode {
        TranscodeMode::Raw => match dir.compression {
            compression::CCITT_G4 => OutputCompression::G4,
            compression::JPEG => OutputCompression::Jpeg,
            _ => OutputCompression::Deflate,
        },
        TranscodeMode::Recode => {
            if !is_decodable(&dir) {
                return Err(ConvertError::unsupported(
                    index,
                    format!(
                        "compression {} with predictor {}",
                        dir.compression, dir.predictor
                    ),
                ));
            }
            recode_codec(&dir, &info, index, options.compression)
        }
    };

    let recode = mode == TranscodeMode::Recode;
    let jpeg_out = codec == OutputCompression::Jpeg;
    let stages = SamplePlan {
        planar_to_contig: planar,
        realize_palette: recode && jpeg_out && info.palette.is_some(),
        alpha: info.alpha,
        ycbcr_to_rgb: info.ycbcr && recode && !jpeg_out,
        lab_signed_to_unsigned: info.lab_transform,
    };
    let ycbcr_jpeg = info.ycbcr && recode && jpeg_out;

    let (bits, components) = if stages.realize_palette {
        let channels = info.palette.as_ref().map_or(3, |p| p.channels);
        (8, u16::from(channels))
    } else if info.alpha.is_some() || info.ycbcr {
        (8, 3)
    } else {
        (dir.bits_per_sample, dir.samples_per_pixel)
    };

    let mut color = ColorSpace::plain(info.base);
    let mut realized_palette = None;
    if stages.realize_palette {
        realized_palette = info.palette;
    } else {
        color.palette = info.palette;
    }

    let icc_profile = match dir.icc_profile.as_ref().filter(|p| !p.is_empty()) {
        Some(_) if matches!(info.base, ColorBase::Lab { .. }) => {
            log::warn!("directory {}: ignoring ICC profile on Lab image", index);
            None
        }
        profile => profile.cloned(),
    };
    color.icc = icc_profile.is_some();
    if options.calibrated && !color.icc {
        color.calibration = calibration(&dir, &info.base, index);
    }

    let transfer = transfer_tables(&dir, index);

    let plan = PagePlan {
        index,
        color,
        invert: info.invert,
        mode,
        codec,
        stages,
        bits,
        components,
        ycbcr_jpeg,
        realized_palette,
        transfer,
        icc_profile,
        directory: dir,
    };
    log::debug!(
        "directory {}: {:?} {:?}, {} bits x {} components, extra objects {}",
        index,
        plan.mode,
        plan.codec,
        plan.bits,
        plan.components,
        plan.extra()
    );
    Ok(plan)
}

/// Validates tag values, substituting defaults for the tolerable ones.
fn normalize(dir: &Directory, index: usize) -> Result<Directory> {
    let mut dir = dir.clone();
    if dir.width == 0 || dir.length == 0 {
        return Err(ConvertError::unsupported(
            index,
            format!("image size {}x{}", dir.width, dir.length),
        ));
    }

    match dir.bits_per_sample {
        0 => {
            log::warn!("directory {}: bits per sample is 0, assuming 1", index);
            dir.bits_per_sample = 1;
        }
        1 | 2 | 4 | 8 => {}
        bits => {
            return Err(ConvertError::unsupported(
                index,
                format!("{} bits per sample", bits),
            ))
        }
    }

    match dir.samples_per_pixel {
        0 => {
            log::warn!("directory {}: samples per pixel is 0, assuming 1", index);
            dir.samples_per_pixel = 1;
        }
        1..=4 => {}
        spp => {
            return Err(ConvertError::unsupported(
                index,
                format!("{} samples per pixel", spp),
            ))
        }
    }

    if dir.sample_format != 1 {
        return Err(ConvertError::unsupported(
            index,
            format!("sample format {}", dir.sample_format),
        ));
    }

    if dir.orientation == 0 || dir.orientation > 8 {
        log::warn!(
            "directory {}: invalid orientation {}, assuming 1",
            index,
            dir.orientation
        );
        dir.orientation = 1;
    }

    match dir.planar_config {
        0 => {
            log::warn!("directory {}: planar configuration 0, assuming contiguous", index);
            dir.planar_config = PLANAR_CONTIG;
        }
        PLANAR_CONTIG | PLANAR_SEPARATE => {}
        planar => {
            return Err(ConvertError::unsupported(
                index,
                format!("planar configuration {}", planar),
            ))
        }
    }
    if dir.planar_config == PLANAR_SEPARATE {
        if dir.samples_per_pixel == 1 {
            dir.planar_config = PLANAR_CONTIG;
        } else if dir.bits_per_sample != 8 {
            return Err(ConvertError::unsupported(
                index,
                format!("planar-separate with {} bits per sample", dir.bits_per_sample),
            ));
        } else if dir.compression == compression::JPEG {
            return Err(ConvertError::unsupported(index, "planar-separate JPEG"));
        }
    }
    Ok(dir)
}

fn interpret(dir: &Directory, index: usize) -> Result<Interpretation> {
    let spp = dir.samples_per_pixel;
    let bits = dir.bits_per_sample;
    let value = dir
        .photometric
        .ok_or_else(|| ConvertError::unsupported(index, "missing photometric interpretation"))?;

    match value {
        photometric::MIN_IS_WHITE | photometric::MIN_IS_BLACK => {
            if spp != 1 {
                return Err(ConvertError::unsupported(
                    index,
                    format!("grayscale with {} samples per pixel", spp),
                ));
            }
            let base = if bits == 1 {
                ColorBase::Bilevel
            } else {
                ColorBase::Gray
            };
            let mut info = Interpretation::new(base);
            info.invert = value == photometric::MIN_IS_WHITE;
            Ok(info)
        }
        photometric::PALETTE => indexed(dir, index, 3, ColorBase::Rgb),
        photometric::RGB if dir.indexed => indexed(dir, index, 3, ColorBase::Rgb),
        photometric::RGB => match spp {
            3 => Ok(Interpretation::new(ColorBase::Rgb)),
            4 => {
                let alpha = match dir.extra_samples.first() {
                    Some(&EXTRASAMPLE_ASSOCIATED_ALPHA) => Some(AlphaMode::Premultiplied),
                    Some(&EXTRASAMPLE_UNASSOCIATED_ALPHA) => Some(AlphaMode::Straight),
                    _ => None,
                };
                match alpha {
                    Some(_) if bits != 8 => Err(ConvertError::unsupported(
                        index,
                        format!("RGBA with {} bits per sample", bits),
                    )),
                    Some(mode) => {
                        let mut info = Interpretation::new(ColorBase::Rgb);
                        info.alpha = Some(mode);
                        Ok(info)
                    }
                    None => {
                        log::warn!(
                            "directory {}: RGB image with 4 samples and no alpha, treating as inverted CMYK",
                            index
                        );
                        let mut info = Interpretation::new(ColorBase::Cmyk);
                        info.invert = true;
                        Ok(info)
                    }
                }
            }
            _ => Err(ConvertError::unsupported(
                index,
                format!("RGB with {} samples per pixel", spp),
            )),
        },
        photometric::SEPARATED => {
            if let Some(ink_set) = dir.ink_set.filter(|&ink| ink != INKSET_CMYK) {
                return Err(ConvertError::unsupported(
                    index,
                    format!("separated image with ink set {}", ink_set),
                ));
            }
            if dir.indexed {
                return indexed(dir, index, 4, ColorBase::Cmyk);
            }
            if spp != 4 {
                return Err(ConvertError::unsupported(
                    index,
                    format!("separated image with {} samples per pixel", spp),
                ));
            }
            Ok(Interpretation::new(ColorBase::Cmyk))
        }
        photometric::YCBCR => match spp {
            1 => Ok(Interpretation::new(ColorBase::Gray)),
            3 if bits == 8 => {
                let mut info = Interpretation::new(ColorBase::Rgb);
                info.ycbcr = true;
                Ok(info)
            }
            _ => Err(ConvertError::unsupported(
                index,
                format!("YCbCr with {} samples of {} bits", spp, bits),
            )),
        },
        photometric::CIELAB | photometric::ICCLAB | photometric::ITULAB => {
            if spp != 3 || bits != 8 {
                return Err(ConvertError::unsupported(
                    index,
                    format!("Lab with {} samples of {} bits", spp, bits),
                ));
            }
            let (range, lab_transform) = match value {
                photometric::CIELAB => (CIELAB_RANGE, true),
                photometric::ICCLAB => (ICCLAB_RANGE, false),
                _ => (ITULAB_RANGE, true),
            };
            let white_point = white_point_xyz(dir.white_point.unwrap_or(D50)).unwrap_or_else(|| {
                log::warn!("directory {}: unusable white point, using D50", index);
                white_point_xyz(D50).unwrap_or([0.9642, 1.0, 0.8249])
            });
            let mut info = Interpretation::new(ColorBase::Lab { range, white_point });
            info.lab_transform = lab_transform;
            Ok(info)
        }
        photometric::LOGL | photometric::LOGLUV => Err(ConvertError::unsupported(
            index,
            "LogL and LogLuv photometric interpretations",
        )),
        other => Err(ConvertError::unsupported(
            index,
            format!("photometric interpretation {}", other),
        )),
    }
}

fn indexed(dir: &Directory, index: usize, channels: u8, base: ColorBase) -> Result<Interpretation> {
    if dir.samples_per_pixel != 1 {
        return Err(ConvertError::unsupported(
            index,
            format!("palette image with {} samples per pixel", dir.samples_per_pixel),
        ));
    }
    let map = dir
        .color_map
        .as_ref()
        .ok_or_else(|| ConvertError::unsupported(index, "palette image without a color map"))?;

    let n = 1usize << dir.bits_per_sample;
    let channels_usize = usize::from(channels);
    if map.len() < n * channels_usize {
        return Err(ConvertError::unsupported(
            index,
            format!("color map has {} values, need {}", map.len(), n * channels_usize),
        ));
    }

    let mut entries = Vec::with_capacity(n * channels_usize);
    for i in 0..n {
        for c in 0..channels_usize {
            entries.push((map[c * n + i] >> 8) as u8);
        }
    }
    let mut info = Interpretation::new(base);
    info.palette = Some(Palette { entries, channels });
    Ok(info)
}

fn can_pass_through(dir: &Directory, info: &Interpretation, planar: bool) -> bool {
    let codec_ok = match dir.compression {
        compression::CCITT_G4 | compression::JPEG => true,
        c if compression::is_deflate(c) => dir.predictor == 1 || dir.predictor == 2,
        _ => false,
    };
    let is_jpeg = dir.compression == compression::JPEG;
    let layout_ok = dir.is_tiled() || dir.chunks_per_plane() == 1 || is_jpeg;
    // Partial edge tiles are always cut down from decoded samples.
    let edges_ok = !dir.has_partial_tiles() || is_decodable(dir);

    codec_ok
        && layout_ok
        && edges_ok
        && !planar
        && info.alpha.is_none()
        && !info.lab_transform
        && (!info.ycbcr || is_jpeg)
        && !(info.palette.is_some() && is_jpeg)
}

/// Whether the container can hand out decoded samples for this directory.
fn is_decodable(dir: &Directory) -> bool {
    let codec_ok = matches!(
        dir.compression,
        compression::NONE
            | compression::PACKBITS
            | compression::LZW
            | compression::CCITT_G4
            | compression::JPEG
    ) || compression::is_deflate(dir.compression);
    let predictor_ok = dir.predictor == 1 || dir.predictor == 2;
    // The JPEG decoder hands back gray or RGB only.
    let jpeg_ok = dir.compression != compression::JPEG || dir.samples_per_pixel <= 3;
    codec_ok && predictor_ok && jpeg_ok
}

fn recode_codec(
    dir: &Directory,
    info: &Interpretation,
    index: usize,
    requested: OutputCompression,
) -> OutputCompression {
    match requested {
        OutputCompression::Jpeg => {
            let eight_bit = info.palette.is_some() || dir.bits_per_sample == 8;
            let base_ok = matches!(info.base, ColorBase::Gray | ColorBase::Rgb | ColorBase::Cmyk);
            if eight_bit && base_ok {
                OutputCompression::Jpeg
            } else {
                log::warn!(
                    "directory {}: JPEG needs 8-bit gray, RGB or CMYK samples, using Deflate",
                    index
                );
                OutputCompression::Deflate
            }
        }
        OutputCompression::G4 => {
            if info.base == ColorBase::Bilevel && info.palette.is_none() {
                OutputCompression::G4
            } else {
                log::warn!("directory {}: G4 needs bilevel samples, using Deflate", index);
                OutputCompression::Deflate
            }
        }
        other => other,
    }
}

fn calibration(dir: &Directory, base: &ColorBase, index: usize) -> Option<Calibration> {
    let white = dir.white_point?;
    let white_point = match white_point_xyz(white) {
        Some(xyz) => xyz,
        None => {
            log::warn!("directory {}: unusable white point, not calibrating", index);
            return None;
        }
    };
    match base {
        ColorBase::Gray => Some(Calibration::Gray {
            white_point,
            gamma: 2.2,
        }),
        ColorBase::Rgb => {
            let primaries = dir.primary_chromaticities?;
            match calrgb_matrix(white, primaries) {
                Some(matrix) => Some(Calibration::Rgb {
                    white_point,
                    gamma: 2.2,
                    matrix,
                }),
                None => {
                    log::warn!(
                        "directory {}: degenerate primary chromaticities, not calibrating",
                        index
                    );
                    None
                }
            }
        }
        _ => None,
    }
}

/// Chromaticity (x, y) to XYZ with Y = 1.
pub fn white_point_xyz([x, y]: [f32; 2]) -> Option<[f32; 3]> {
    if !(x.is_finite() && y.is_finite()) || y <= 0.0 {
        return None;
    }
    Some([x / y, 1.0, (1.0 - x - y) / y])
}

/// CalRGB matrix mapping the primaries so that full RGB lands on the
/// white point.
pub fn calrgb_matrix(white: [f32; 2], primaries: [f32; 6]) -> Option<[f32; 9]> {
    let w = white_point_xyz(white)?;
    let r = white_point_xyz([primaries[0], primaries[1]])?;
    let g = white_point_xyz([primaries[2], primaries[3]])?;
    let b = white_point_xyz([primaries[4], primaries[5]])?;

    let det3 = |c0: [f32; 3], c1: [f32; 3], c2: [f32; 3]| {
        c0[0] * (c1[1] * c2[2] - c2[1] * c1[2]) - c1[0] * (c0[1] * c2[2] - c2[1] * c0[2])
            + c2[0] * (c0[1] * c1[2] - c1[1] * c0[2])
    };
    let det = det3(r, g, b);
    if det.abs() < 1e-6 {
        return None;
    }
    let sr = det3(w, g, b) / det;
    let sg = det3(r, w, b) / det;
    let sb = det3(r, g, w) / det;

    Some([
        sr * r[0], sr * r[1], sr * r[2],
        sg * g[0], sg * g[1], sg * g[2],
        sb * b[0], sb * b[1], sb * b[2],
    ])
}

fn transfer_tables(dir: &Directory, index: usize) -> Vec<Vec<u16>> {
    let table = match &dir.transfer_function {
        Some(table) => table,
        None => return Vec::new(),
    };
    let n = 1usize << dir.bits_per_sample;
    if table.len() == n {
        return vec![table.clone()];
    }
    if table.len() == 3 * n {
        let channels: Vec<Vec<u16>> = table.chunks(n).map(<[u16]>::to_vec).collect();
        if channels[0] == channels[1] && channels[1] == channels[2] {
            return vec![channels[0].clone()];
        }
        return channels;
    }
    log::warn!(
        "directory {}: transfer function has {} entries, expected {} or {}, ignoring",
        index,
        table.len(),
        n,
        3 * n
    );
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(photometric: u16, bits: u16, spp: u16) -> Directory {
        Directory {
            width: 16,
            length: 16,
            bits_per_sample: bits,
            samples_per_pixel: spp,
            photometric: Some(photometric),
            chunk_offsets: vec![8],
            chunk_byte_counts: vec![16],
            ..Default::default()
        }
    }

    fn plan(d: &Directory) -> PagePlan {
        classify(d, 0, &ConvertOptions::default()).unwrap()
    }

    fn with_codec(d: &Directory, codec: OutputCompression) -> PagePlan {
        let options = ConvertOptions {
            compression: codec,
            ..Default::default()
        };
        classify(d, 0, &options).unwrap()
    }

    #[test]
    fn test_min_is_white_gray() {
        let p = plan(&dir(photometric::MIN_IS_WHITE, 8, 1));
        assert_eq!(p.color.base, ColorBase::Gray);
        assert!(p.invert);
        assert_eq!(p.mode, TranscodeMode::Recode);
        assert_eq!(p.codec, OutputCompression::None);
        assert_eq!(p.extra(), 0);
        assert_eq!(p.pdf_minor(), 1);
        assert!(p.stages.is_empty());
    }

    #[test]
    fn test_one_bit_is_bilevel() {
        let p = plan(&dir(photometric::MIN_IS_BLACK, 1, 1));
        assert_eq!(p.color.base, ColorBase::Bilevel);
        assert!(!p.invert);
    }

    #[test]
    fn test_palette_entries_take_high_byte() {
        let mut d = dir(photometric::PALETTE, 1, 1);
        d.color_map = Some(vec![0x0000, 0xFF00, 0x1200, 0x3400, 0xAB00, 0xCDFF]);
        let p = plan(&d);
        let palette = p.color.palette.as_ref().unwrap();
        assert_eq!(palette.entries, vec![0x00, 0x12, 0xAB, 0xFF, 0x34, 0xCD]);
        assert_eq!(palette.hival(), 1);
        assert_eq!(p.extra(), 1);
    }

    #[test]
    fn test_palette_with_jpeg_output_is_realized() {
        let mut d = dir(photometric::PALETTE, 8, 1);
        d.color_map = Some(vec![0; 3 * 256]);
        let p = with_codec(&d, OutputCompression::Jpeg);
        assert!(p.stages.realize_palette);
        assert!(p.color.palette.is_none());
        assert_eq!(p.realized_palette.as_ref().map(Palette::len), Some(256));
        assert_eq!((p.bits, p.components), (8, 3));
        assert_eq!(p.extra(), 0);
    }

    #[test]
    fn test_missing_color_map_is_fatal() {
        let d = dir(photometric::PALETTE, 8, 1);
        assert!(matches!(
            classify(&d, 3, &ConvertOptions::default()),
            Err(ConvertError::Unsupported { directory: 3, .. })
        ));
    }

    #[test]
    fn test_rgba_alpha_modes() {
        let mut d = dir(photometric::RGB, 8, 4);
        d.extra_samples = vec![EXTRASAMPLE_ASSOCIATED_ALPHA];
        let p = plan(&d);
        assert_eq!(p.stages.alpha, Some(AlphaMode::Premultiplied));
        assert_eq!((p.bits, p.components), (8, 3));

        d.extra_samples = vec![EXTRASAMPLE_UNASSOCIATED_ALPHA];
        assert_eq!(plan(&d).stages.alpha, Some(AlphaMode::Straight));
    }

    #[test]
    fn test_four_sample_rgb_without_alpha_is_inverted_cmyk() {
        let p = plan(&dir(photometric::RGB, 8, 4));
        assert_eq!(p.color.base, ColorBase::Cmyk);
        assert!(p.invert);
        assert_eq!(p.components, 4);
    }

    #[test]
    fn test_single_strip_g4_passes_through() {
        let mut d = dir(photometric::MIN_IS_WHITE, 1, 1);
        d.compression = compression::CCITT_G4;
        let p = plan(&d);
        assert_eq!(p.mode, TranscodeMode::Raw);
        assert_eq!(p.codec, OutputCompression::G4);

        d.chunk_offsets = vec![8, 24];
        d.chunk_byte_counts = vec![16, 16];
        d.rows_per_strip = 8;
        assert_eq!(plan(&d).mode, TranscodeMode::Recode);

        let options = ConvertOptions {
            passthrough: false,
            ..Default::default()
        };
        d.chunk_offsets.truncate(1);
        assert_eq!(classify(&d, 0, &options).unwrap().mode, TranscodeMode::Recode);
    }

    #[test]
    fn test_deflate_predictor_gates_passthrough() {
        let mut d = dir(photometric::MIN_IS_BLACK, 8, 1);
        d.compression = compression::DEFLATE;
        d.predictor = 2;
        let p = plan(&d);
        assert_eq!(p.mode, TranscodeMode::Raw);
        assert_eq!(p.pdf_minor(), 2);

        d.predictor = 3;
        assert!(classify(&d, 0, &ConvertOptions::default()).is_err());
    }

    #[test]
    fn test_partial_tiles_need_decodable_data() {
        let mut d = dir(photometric::MIN_IS_BLACK, 4, 1);
        d.compression = compression::DEFLATE;
        d.predictor = 2;
        d.tile_size = Some((16, 16));
        d.width = 20;
        d.length = 18;
        d.chunk_offsets = vec![8; 4];
        d.chunk_byte_counts = vec![16; 4];
        assert!(d.has_partial_tiles());
        assert_eq!(plan(&d).mode, TranscodeMode::Raw);

        let mut cmyk = dir(photometric::SEPARATED, 8, 4);
        cmyk.compression = compression::JPEG;
        cmyk.tile_size = Some((16, 16));
        assert_eq!(plan(&cmyk).mode, TranscodeMode::Raw);

        cmyk.width = 20;
        cmyk.chunk_offsets = vec![8; 2];
        cmyk.chunk_byte_counts = vec![16; 2];
        assert!(matches!(
            classify(&cmyk, 0, &ConvertOptions::default()),
            Err(ConvertError::Unsupported { directory: 0, .. })
        ));
    }

    #[test]
    fn test_codec_fallbacks() {
        let bilevel = dir(photometric::MIN_IS_BLACK, 1, 1);
        assert_eq!(with_codec(&bilevel, OutputCompression::Jpeg).codec, OutputCompression::Deflate);
        assert_eq!(with_codec(&bilevel, OutputCompression::G4).codec, OutputCompression::G4);

        let gray = dir(photometric::MIN_IS_BLACK, 8, 1);
        assert_eq!(with_codec(&gray, OutputCompression::G4).codec, OutputCompression::Deflate);
        assert_eq!(with_codec(&gray, OutputCompression::Jpeg).codec, OutputCompression::Jpeg);

        let lab = dir(photometric::CIELAB, 8, 3);
        assert_eq!(with_codec(&lab, OutputCompression::Jpeg).codec, OutputCompression::Deflate);
    }

    #[test]
    fn test_ycbcr_stages() {
        let d = dir(photometric::YCBCR, 8, 3);
        let deflate = with_codec(&d, OutputCompression::Deflate);
        assert!(deflate.stages.ycbcr_to_rgb);
        assert!(!deflate.ycbcr_jpeg);

        let jpeg = with_codec(&d, OutputCompression::Jpeg);
        assert!(!jpeg.stages.ycbcr_to_rgb);
        assert!(jpeg.ycbcr_jpeg);
        assert_eq!(jpeg.color.base, ColorBase::Rgb);

        assert_eq!(plan(&dir(photometric::YCBCR, 8, 1)).color.base, ColorBase::Gray);
    }

    #[test]
    fn test_lab_variants() {
        let cie = plan(&dir(photometric::CIELAB, 8, 3));
        assert!(cie.stages.lab_signed_to_unsigned);
        assert!(matches!(cie.color.base, ColorBase::Lab { range: [-127, 127, -127, 127], .. }));

        let icc = plan(&dir(photometric::ICCLAB, 8, 3));
        assert!(!icc.stages.lab_signed_to_unsigned);

        let itu = plan(&dir(photometric::ITULAB, 8, 3));
        assert!(matches!(itu.color.base, ColorBase::Lab { range: [-85, 85, -75, 124], .. }));
    }

    #[test]
    fn test_icc_and_transfer_extras() {
        let mut d = dir(photometric::MIN_IS_BLACK, 2, 1);
        d.icc_profile = Some(vec![1, 2, 3]);
        let p = plan(&d);
        assert!(p.color.icc);
        assert_eq!(p.extra(), 1);
        assert_eq!(p.pdf_minor(), 3);

        d.icc_profile = None;
        d.transfer_function = Some((0..12).collect());
        let p = plan(&d);
        assert_eq!(p.transfer.len(), 3);
        assert_eq!(p.extra(), 4);
        assert_eq!(p.pdf_minor(), 2);

        d.transfer_function = Some([0, 1, 2, 3].repeat(3));
        assert_eq!(plan(&d).transfer.len(), 1);
        assert_eq!(plan(&d).extra(), 2);
    }

    #[test]
    fn test_fatal_and_tolerated_tags() {
        let options = ConvertOptions::default();
        assert!(classify(&dir(photometric::LOGLUV, 8, 3), 0, &options).is_err());
        assert!(classify(&dir(photometric::MIN_IS_BLACK, 16, 1), 0, &options).is_err());
        assert!(classify(&dir(photometric::RGB, 8, 5), 0, &options).is_err());

        let mut zero = dir(photometric::MIN_IS_BLACK, 8, 1);
        zero.width = 0;
        assert!(classify(&zero, 0, &options).is_err());

        let mut inks = dir(photometric::SEPARATED, 8, 4);
        inks.ink_set = Some(2);
        assert!(classify(&inks, 0, &options).is_err());

        let mut odd = dir(photometric::MIN_IS_BLACK, 0, 1);
        odd.orientation = 9;
        odd.planar_config = 0;
        let p = plan(&odd);
        assert_eq!(p.directory.bits_per_sample, 1);
        assert_eq!(p.directory.orientation, 1);
        assert_eq!(p.directory.planar_config, PLANAR_CONTIG);
    }

    #[test]
    fn test_planar_separate_rules() {
        let mut d = dir(photometric::RGB, 8, 3);
        d.planar_config = PLANAR_SEPARATE;
        d.chunk_offsets = vec![8, 24, 40];
        let p = plan(&d);
        assert!(p.stages.planar_to_contig);
        assert_eq!(p.mode, TranscodeMode::Recode);

        d.compression = compression::JPEG;
        assert!(classify(&d, 0, &ConvertOptions::default()).is_err());
    }

    #[test]
    fn test_calibration() {
        let mut d = dir(photometric::RGB, 8, 3);
        d.white_point = Some([0.3127, 0.3290]);
        d.primary_chromaticities = Some([0.64, 0.33, 0.30, 0.60, 0.15, 0.06]);
        let options = ConvertOptions {
            calibrated: true,
            ..Default::default()
        };
        let p = classify(&d, 0, &options).unwrap();
        match p.color.calibration {
            Some(Calibration::Rgb { matrix, white_point, .. }) => {
                let y_sum = matrix[1] + matrix[4] + matrix[7];
                assert!((y_sum - 1.0).abs() < 1e-3);
                assert!((white_point[0] - 0.9505).abs() < 1e-3);
            }
            other => panic!("expected CalRGB, got {:?}", other),
        }
        assert!(plan(&d).color.calibration.is_none());
    }
}
