//! JPEG bitstream surgery.
//!
//! TIFF stores JPEG pages either as one self-contained stream per strip or as
//! abbreviated streams sharing a `JPEGTables` header. PDF wants one complete
//! stream per image, so strips are stitched together with restart markers
//! and abbreviated streams get their tables put back in front.

use crate::error::{ConvertError, Result};

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const DQT: u8 = 0xDB;
const DHT: u8 = 0xC4;
const DRI: u8 = 0xDD;
const RST0: u8 = 0xD0;

/// Start-of-frame markers that can be stitched with restart intervals.
const FRAME_MARKERS: [u8; 5] = [0xC0, 0xC1, 0xC3, 0xC9, 0xCA];

/// Merges the strips of one JPEG-compressed page into a single stream.
///
/// The frame header is taken from strip zero with its height replaced by
/// `image_height`, and a restart interval covering one strip is inserted.
/// Every later strip contributes only its entropy-coded data, preceded by the
/// next `RSTn` marker.
pub fn splice_strips(strips: &[Vec<u8>], image_height: u32, tables: Option<&[u8]>) -> Result<Vec<u8>> {
    let height = u16::try_from(image_height)
        .map_err(|_| ConvertError::Jpeg(format!("image height {} exceeds JPEG limit", image_height)))?;

    let capacity = strips.iter().map(Vec::len).sum::<usize>() + tables.map_or(0, <[u8]>::len) + 16;
    let mut splice = Splice {
        out: Vec::with_capacity(capacity),
        height,
        have_soi: false,
        have_frame: false,
    };

    if let Some(tables) = tables.filter(|t| t.len() > 4) {
        splice.out.extend_from_slice(strip_eoi(tables));
        splice.have_soi = true;
    }
    for (n, strip) in strips.iter().enumerate() {
        splice.copy_strip(strip, n)?;
    }
    splice.out.extend_from_slice(&[MARKER, EOI]);

    log::debug!(
        "spliced {} JPEG strips into {} bytes, height {}",
        strips.len(),
        splice.out.len(),
        image_height
    );
    Ok(splice.out)
}

/// Prefixes an abbreviated tile or strip stream with the shared tables.
///
/// The tables lose their end-of-image marker and the chunk loses its
/// start-of-image marker, leaving one well-formed stream.
pub fn merge_tables(tables: &[u8], chunk: &[u8]) -> Result<Vec<u8>> {
    if tables.len() <= 4 {
        return Ok(chunk.to_vec());
    }
    if tables[..2] != [MARKER, SOI] {
        return Err(ConvertError::Jpeg("JPEG tables do not start with SOI".into()));
    }
    let body = match chunk {
        [MARKER, SOI, rest @ ..] => rest,
        _ => chunk,
    };
    let head = strip_eoi(tables);
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head);
    out.extend_from_slice(body);
    Ok(out)
}

fn strip_eoi(data: &[u8]) -> &[u8] {
    match data {
        [rest @ .., MARKER, EOI] => rest,
        _ => data,
    }
}

/// Entropy-coded data of a scan, up to its end-of-image marker.
fn entropy_data(data: &[u8]) -> &[u8] {
    match data.windows(2).position(|w| w == [MARKER, EOI]) {
        Some(end) => &data[..end],
        None => data,
    }
}

struct Splice {
    out: Vec<u8>,
    height: u16,
    have_soi: bool,
    have_frame: bool,
}

impl Splice {
    fn copy_strip(&mut self, strip: &[u8], n: usize) -> Result<()> {
        let bad = |what: &str| ConvertError::Jpeg(format!("strip {}: {}", n, what));
        let mut i = 0;
        while i < strip.len() {
            if strip[i] != MARKER {
                return Err(bad(&format!("expected marker at byte {}", i)));
            }
            i += 1;
            while i < strip.len() && strip[i] == MARKER {
                i += 1;
            }
            let marker = *strip.get(i).ok_or_else(|| bad("truncated marker"))?;

            if marker == SOI {
                if n == 0 && !self.have_soi {
                    self.out.extend_from_slice(&[MARKER, SOI]);
                    self.have_soi = true;
                }
                i += 1;
                continue;
            }

            let len = match strip.get(i + 1..i + 3) {
                Some(b) => usize::from(u16::from_be_bytes([b[0], b[1]])),
                None => return Err(bad("truncated segment length")),
            };
            if len < 2 || i + 1 + len > strip.len() {
                return Err(bad("segment runs past end of strip"));
            }
            let segment = &strip[i - 1..i + 1 + len];

            match marker {
                m if FRAME_MARKERS.contains(&m) => {
                    if n == 0 {
                        self.write_frame(segment)?;
                    }
                }
                DQT | DHT => {
                    if n == 0 {
                        self.out.extend_from_slice(segment);
                    }
                }
                SOS => {
                    if n == 0 {
                        if !self.have_frame {
                            return Err(bad("no supported start-of-frame before scan"));
                        }
                        self.out.extend_from_slice(segment);
                    } else {
                        self.out.push(MARKER);
                        self.out.push(RST0 | ((n - 1) % 8) as u8);
                    }
                    self.out.extend_from_slice(entropy_data(&strip[i + 1 + len..]));
                    return Ok(());
                }
                _ => {}
            }
            i += 1 + len;
        }
        Err(bad("no start-of-scan marker"))
    }

    /// Copies a start-of-frame segment with the full image height and
    /// follows it with a restart interval of one strip.
    fn write_frame(&mut self, segment: &[u8]) -> Result<()> {
        if segment.len() < 10 {
            return Err(ConvertError::Jpeg("start-of-frame segment too short".into()));
        }
        let components = usize::from(segment[9]);
        if !(1..=4).contains(&components) || segment.len() < 10 + 3 * components {
            return Err(ConvertError::Jpeg(format!(
                "start-of-frame declares {} components",
                components
            )));
        }

        let (mut h_max, mut v_max) = (1u32, 1u32);
        for j in 0..components {
            let sampling = segment[11 + 3 * j];
            h_max = h_max.max(u32::from(sampling >> 4));
            v_max = v_max.max(u32::from(sampling & 0x0F));
        }
        let rows = u32::from(u16::from_be_bytes([segment[5], segment[6]]));
        let cols = u32::from(u16::from_be_bytes([segment[7], segment[8]]));
        let interval = rows.div_ceil(8 * v_max) * cols.div_ceil(8 * h_max);
        let interval = u16::try_from(interval)
            .map_err(|_| ConvertError::Jpeg(format!("restart interval {} too large", interval)))?;

        let start = self.out.len();
        self.out.extend_from_slice(segment);
        self.out[start + 5..start + 7].copy_from_slice(&self.height.to_be_bytes());

        self.out.extend_from_slice(&[MARKER, DRI, 0x00, 0x04]);
        self.out.extend_from_slice(&interval.to_be_bytes());
        self.have_frame = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal strip: SOI, DQT, SOF0 (1 component), DHT, SOS, data, EOI.
    fn synthetic_strip(height: u16, width: u16, data: &[u8]) -> Vec<u8> {
        let mut s = vec![MARKER, SOI];
        s.extend_from_slice(&[MARKER, DQT, 0x00, 0x04, 0x00, 0x01]);
        s.extend_from_slice(&[MARKER, 0xC0, 0x00, 0x0B, 0x08]);
        s.extend_from_slice(&height.to_be_bytes());
        s.extend_from_slice(&width.to_be_bytes());
        s.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
        s.extend_from_slice(&[MARKER, DHT, 0x00, 0x03, 0x00]);
        s.extend_from_slice(&[MARKER, SOS, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        s.extend_from_slice(data);
        s.extend_from_slice(&[MARKER, EOI]);
        s
    }

    fn markers(stream: &[u8]) -> Vec<u8> {
        stream
            .windows(2)
            .filter(|w| w[0] == MARKER && w[1] != 0x00 && w[1] != MARKER)
            .map(|w| w[1])
            .collect()
    }

    #[test]
    fn test_splice_two_one_row_strips() {
        let strips = vec![
            synthetic_strip(1, 8, &[0x12, 0x34]),
            synthetic_strip(1, 8, &[0x56, 0x78]),
        ];
        let out = splice_strips(&strips, 2, None).unwrap();

        let sof = out.windows(2).position(|w| w == [MARKER, 0xC0]).unwrap();
        assert_eq!(u16::from_be_bytes([out[sof + 5], out[sof + 6]]), 2);

        // One frame, one scan header, one restart marker, one EOI.
        assert_eq!(
            markers(&out),
            vec![SOI, DQT, 0xC0, DRI, DHT, SOS, RST0, EOI]
        );
        let dri = out.windows(2).position(|w| w == [MARKER, DRI]).unwrap();
        assert_eq!(&out[dri + 2..dri + 6], &[0x00, 0x04, 0x00, 0x01]);
        assert!(out.ends_with(&[0x12, 0x34, MARKER, RST0, 0x56, 0x78, MARKER, EOI]));
    }

    #[test]
    fn test_bytes_after_eoi_are_dropped() {
        let mut first = synthetic_strip(1, 8, &[0x12, 0xFF, 0x00]);
        first.extend_from_slice(&[0xAA, 0xBB, MARKER, EOI]);
        let mut second = synthetic_strip(1, 8, &[0x56]);
        second.extend_from_slice(&[0x00, 0x00, 0xCC]);

        let out = splice_strips(&[first, second], 2, None).unwrap();
        assert!(out.ends_with(&[0x12, 0xFF, 0x00, MARKER, RST0, 0x56, MARKER, EOI]));
        assert!(!out.contains(&0xAA));
        assert!(!out.contains(&0xCC));
        assert_eq!(markers(&out).iter().filter(|&&m| m == EOI).count(), 1);
    }

    #[test]
    fn test_restart_markers_cycle() {
        let strips: Vec<Vec<u8>> = (0..10).map(|i| synthetic_strip(8, 8, &[i])).collect();
        let out = splice_strips(&strips, 80, None).unwrap();
        let restarts: Vec<u8> = markers(&out)
            .into_iter()
            .filter(|m| (RST0..=RST0 + 7).contains(m))
            .collect();
        assert_eq!(
            restarts,
            vec![0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD0]
        );
        assert_eq!(markers(&out).iter().filter(|&&m| m == SOI).count(), 1);
    }

    #[test]
    fn test_tables_replace_strip_header() {
        let tables = [MARKER, SOI, MARKER, DQT, 0x00, 0x04, 0x00, 0x01, MARKER, EOI];
        let out = splice_strips(&[synthetic_strip(1, 8, &[0x01])], 1, Some(&tables)).unwrap();
        assert!(out.starts_with(&[MARKER, SOI, MARKER, DQT]));
        assert_eq!(markers(&out).iter().filter(|&&m| m == SOI).count(), 1);
    }

    #[test]
    fn test_garbage_strip_is_rejected() {
        assert!(splice_strips(&[vec![0x00, 0x01, 0x02]], 1, None).is_err());
        let no_scan = vec![MARKER, SOI, MARKER, DQT, 0x00, 0x04, 0x00, 0x01];
        assert!(splice_strips(&[no_scan], 1, None).is_err());
    }

    #[test]
    fn test_merge_tables() {
        let tables = [MARKER, SOI, MARKER, DQT, 0x00, 0x03, 0x00, MARKER, EOI];
        let chunk = [MARKER, SOI, MARKER, SOS, 0x00, 0x02, 0xAB, MARKER, EOI];
        let merged = merge_tables(&tables, &chunk).unwrap();
        assert_eq!(
            merged,
            vec![MARKER, SOI, MARKER, DQT, 0x00, 0x03, 0x00, MARKER, SOS, 0x00, 0x02, 0xAB, MARKER, EOI]
        );
        assert_eq!(merge_tables(&[MARKER, SOI, MARKER, EOI], &chunk).unwrap(), chunk.to_vec());
    }

    #[test]
    fn test_spliced_stream_decodes() {
        let encode = |value: u8| {
            let mut bytes = Vec::new();
            jpeg_encoder::Encoder::new(&mut bytes, 90)
                .encode(&[value; 16 * 8], 16, 8, jpeg_encoder::ColorType::Luma)
                .unwrap();
            bytes
        };
        let out = splice_strips(&[encode(40), encode(200)], 16, None).unwrap();
        let img = image::load_from_memory_with_format(&out, image::ImageFormat::Jpeg)
            .unwrap()
            .to_luma8();
        assert_eq!(img.dimensions(), (16, 16));
        assert!(img.get_pixel(3, 2)[0].abs_diff(40) < 8);
        assert!(img.get_pixel(3, 12)[0].abs_diff(200) < 8);
    }
}
