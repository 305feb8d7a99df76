//! Sample transforms for pages that get re-encoded.

use crate::classify::{AlphaMode, PagePlan, Palette};
use crate::container::Container;
use crate::error::{ConvertError, Result};

/// Geometry and sample layout of a decoded buffer. Rows are padded to whole
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleShape {
    pub width: u32,
    pub rows: u32,
    pub bits: u16,
    pub samples: u16,
}

impl SampleShape {
    pub fn row_bytes(&self) -> usize {
        (self.width as usize * self.samples as usize * self.bits as usize).div_ceil(8)
    }

    pub fn byte_len(&self) -> usize {
        self.row_bytes() * self.rows as usize
    }
}

/// Reads chunk `chunk` of the page and runs every stage of its plan.
///
/// For planar-separate images `chunk` is the position within the first
/// plane; the matching chunks of the other planes are read alongside.
pub fn read_samples<C: Container + ?Sized>(
    container: &mut C,
    plan: &PagePlan,
    chunk: u32,
) -> Result<(Vec<u8>, SampleShape)> {
    let dir = &plan.directory;
    let index = plan.index;
    let stages = &plan.stages;
    let mut shape = SampleShape {
        width: dir.chunk_size().0,
        rows: dir.chunk_rows(chunk),
        bits: dir.bits_per_sample,
        samples: dir.samples_per_pixel,
    };
    let pixels = shape.width as usize * shape.rows as usize;

    let mut data = if stages.ycbcr_to_rgb {
        let rgba = container.read_rgba_chunk(index, chunk)?;
        shape.bits = 8;
        shape.samples = 3;
        rgba_to_rgb(&rgba, AlphaMode::Straight)
    } else if stages.planar_to_contig {
        let per_plane = dir.chunks_per_plane();
        let planes = (0..u32::from(dir.samples_per_pixel))
            .map(|k| container.read_chunk(index, chunk + k * per_plane))
            .collect::<Result<Vec<_>>>()?;
        planar_to_contig(&planes, pixels, index)?
    } else {
        container.read_chunk(index, chunk)?
    };

    if stages.realize_palette {
        let palette = plan
            .realized_palette
            .as_ref()
            .ok_or_else(|| ConvertError::unsupported(index, "palette stage without a palette"))?;
        let (realized, realized_shape) = realize_palette(&data, shape, palette, index)?;
        data = realized;
        shape = realized_shape;
    }

    if let Some(mode) = stages.alpha {
        data = rgba_to_rgb(&data, mode);
        shape.samples = 3;
    }

    if stages.lab_signed_to_unsigned {
        lab_signed_to_unsigned(&mut data);
    }

    if data.len() < shape.byte_len() {
        return Err(ConvertError::container(
            index,
            format!(
                "chunk {} has {} bytes after transforms, expected {}",
                chunk,
                data.len(),
                shape.byte_len()
            ),
        ));
    }
    data.truncate(shape.byte_len());
    Ok((data, shape))
}

/// Interleaves 8-bit sample planes into one buffer.
pub fn planar_to_contig(planes: &[Vec<u8>], pixels: usize, index: usize) -> Result<Vec<u8>> {
    if let Some(short) = planes.iter().find(|p| p.len() < pixels) {
        return Err(ConvertError::container(
            index,
            format!("plane holds {} samples, expected {}", short.len(), pixels),
        ));
    }
    let spp = planes.len();
    let mut out = vec![0u8; pixels * spp];
    for (k, plane) in planes.iter().enumerate() {
        for (i, &sample) in plane[..pixels].iter().enumerate() {
            out[i * spp + k] = sample;
        }
    }
    Ok(out)
}

/// Replaces palette indices by their color entries.
pub fn realize_palette(
    data: &[u8],
    shape: SampleShape,
    palette: &Palette,
    index: usize,
) -> Result<(Vec<u8>, SampleShape)> {
    let bits = usize::from(shape.bits);
    let channels = usize::from(palette.channels);
    let width = shape.width as usize;
    let row_bytes = shape.row_bytes();
    let mask = (1u16 << bits) - 1;
    let mut out = Vec::with_capacity(width * shape.rows as usize * channels);

    for row in data.chunks(row_bytes).take(shape.rows as usize) {
        for x in 0..width {
            let bit = x * bits;
            let byte = *row.get(bit / 8).ok_or_else(|| {
                ConvertError::container(index, "palette row shorter than its width")
            })?;
            let shift = 8 - bits - bit % 8;
            let value = usize::from((u16::from(byte) >> shift) & mask);
            let entry = palette
                .entries
                .get(value * channels..(value + 1) * channels)
                .ok_or_else(|| {
                    ConvertError::unsupported(
                        index,
                        format!("palette index {} past {} entries", value, palette.len()),
                    )
                })?;
            out.extend_from_slice(entry);
        }
    }

    let shape = SampleShape {
        bits: 8,
        samples: u16::from(palette.channels),
        ..shape
    };
    Ok((out, shape))
}

/// Drops the alpha channel of 8-bit RGBA samples.
///
/// Premultiplied color is composed onto white with wrapping 8-bit
/// addition.
pub fn rgba_to_rgb(data: &[u8], mode: AlphaMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    for px in data.chunks_exact(4) {
        match mode {
            AlphaMode::Straight => out.extend_from_slice(&px[..3]),
            AlphaMode::Premultiplied => {
                let fill = 255 - px[3];
                out.extend(px[..3].iter().map(|c| c.wrapping_add(fill)));
            }
        }
    }
    out
}

/// Shifts signed a* and b* samples into the unsigned range.
pub fn lab_signed_to_unsigned(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        for v in &mut px[1..] {
            *v = if *v & 0x80 != 0 { *v - 0x80 } else { *v | 0x80 };
        }
    }
}

/// Cuts a full-size tile down to the part inside the image.
pub fn collapse_edge(data: &[u8], shape: SampleShape, width: u32, rows: u32) -> (Vec<u8>, SampleShape) {
    let collapsed = SampleShape {
        width,
        rows,
        ..shape
    };
    let src_row = shape.row_bytes();
    let dst_row = collapsed.row_bytes();
    let mut out = Vec::with_capacity(collapsed.byte_len());
    for row in data.chunks(src_row).take(rows as usize) {
        out.extend_from_slice(&row[..dst_row.min(row.len())]);
    }
    (out, collapsed)
}
