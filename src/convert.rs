//! Conversion engine.
//!
//! Scans the container once to plan and number every object, then writes
//! the document front to back: catalog, info, page tree, and for each page
//! its dictionary, content stream, auxiliary objects and images.

use std::io::{self, Write};

use lopdf::Dictionary;
use serde::Serialize;

use crate::classify::{PagePlan, TranscodeMode};
use crate::codec::{self, EncodeSettings, Encoded};
use crate::container::{compression, photometric, Container, Directory, FILLORDER_LSB2MSB};
use crate::error::{ConvertError, Result};
use crate::geometry::{self, PageGeometry};
use crate::jpeg_splice;
use crate::options::{ConvertOptions, OutputCompression};
use crate::pdf::{self, ImageParams, Info};
use crate::pipeline::{self, SampleShape};
use crate::scanner::{self, Page, Scan, CATALOG_OBJECT, INFO_OBJECT, PAGES_OBJECT};
use crate::writer::{OutputMode, StreamLength, Writer};

/// Summary of one written page.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub directory: usize,
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    pub mode: String,
    pub codec: String,
    pub color_space: String,
    pub tiles: u32,
    pub first_object: u32,
}

/// Result of a conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub bytes_written: u64,
    pub page_count: usize,
    pub object_count: u32,
    pub pdf_version: String,
    pub pages: Vec<PageReport>,
}

/// Converts every page of `container` into a PDF written to `sink`.
pub fn convert<C, W>(container: &mut C, sink: W, options: &ConvertOptions) -> Result<ConvertResult>
where
    C: Container + ?Sized,
    W: Write,
{
    run(container, sink, OutputMode::Enabled, options).map(|(_, result)| result)
}

/// Size in bytes of the PDF [`convert`] would produce, without producing it.
pub fn measure<C: Container + ?Sized>(container: &mut C, options: &ConvertOptions) -> Result<u64> {
    let (_, result) = run(container, io::sink(), OutputMode::Disabled, options)?;
    Ok(result.bytes_written)
}

fn run<C, W>(
    container: &mut C,
    sink: W,
    mode: OutputMode,
    options: &ConvertOptions,
) -> Result<(W, ConvertResult)>
where
    C: Container + ?Sized,
    W: Write,
{
    options.validate()?;
    let scan = scanner::scan(container, options)?;
    if scan.pages.is_empty() {
        return Err(ConvertError::NoPages);
    }
    log::info!(
        "{} page(s), {} objects, PDF 1.{}",
        scan.pages.len(),
        scan.object_count,
        scan.pdf_minor
    );

    let info = document_info(&scan, options);
    let file_id = options
        .file_id
        .clone()
        .unwrap_or_else(|| file_id(&info, &scan));

    let mut writer = Writer::new(sink, mode);
    writer.header(scan.pdf_minor)?;
    writer.dict_object(CATALOG_OBJECT, pdf::catalog(options.fit_window))?;
    writer.dict_object(INFO_OBJECT, info.dict())?;
    let kids: Vec<u32> = scan.pages.iter().map(|p| p.layout.page()).collect();
    writer.dict_object(PAGES_OBJECT, pdf::pages(&kids))?;

    let mut reports = Vec::with_capacity(scan.pages.len());
    for (i, page) in scan.pages.iter().enumerate() {
        reports.push(write_page(container, &mut writer, page, i + 1, options)?);
    }

    if writer.next_object() != scan.object_count + 1 {
        return Err(ConvertError::ObjectNumbering {
            expected: scan.object_count + 1,
            actual: writer.next_object(),
        });
    }
    let (sink, bytes_written) = writer.finish(&file_id)?;
    log::info!("wrote {} bytes", bytes_written);

    Ok((
        sink,
        ConvertResult {
            bytes_written,
            page_count: scan.pages.len(),
            object_count: scan.object_count,
            pdf_version: format!("1.{}", scan.pdf_minor),
            pages: reports,
        },
    ))
}

/// Info dictionary values: options first, then the first page's tags.
fn document_info(scan: &Scan, options: &ConvertOptions) -> Info {
    let first = scan.pages.first().map(|p| &p.plan.directory);
    let tag = |pick: fn(&Directory) -> &Option<String>| {
        first
            .and_then(|d| pick(d).as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let date = options
        .datetime
        .clone()
        .or_else(|| {
            first
                .and_then(|d| d.date_time.as_deref())
                .and_then(pdf::pdf_date_from_tiff)
        })
        .unwrap_or_else(|| chrono::Local::now().format("D:%Y%m%d%H%M%S").to_string());

    Info {
        date,
        producer: options.producer.clone(),
        creator: options.creator.clone().or_else(|| tag(|d| &d.software)),
        author: options
            .author
            .clone()
            .or_else(|| tag(|d| &d.artist))
            .or_else(|| tag(|d| &d.copyright)),
        title: options.title.clone().or_else(|| tag(|d| &d.document_name)),
        subject: options
            .subject
            .clone()
            .or_else(|| tag(|d| &d.image_description)),
        keywords: options.keywords.clone(),
    }
}

fn file_id(info: &Info, scan: &Scan) -> String {
    let seed = format!(
        "{}{}{}{}",
        info.producer,
        info.date,
        scan.pages.len(),
        scan.object_count
    );
    format!("{:x}", md5::compute(seed.as_bytes()))
}

fn write_page<C, W>(
    container: &mut C,
    writer: &mut Writer<W>,
    page: &Page,
    sequence: usize,
    options: &ConvertOptions,
) -> Result<PageReport>
where
    C: Container + ?Sized,
    W: Write,
{
    let plan = &page.plan;
    let layout = &page.layout;
    let geometry = geometry::compose(&plan.directory, options);

    let names: Vec<String> = if geometry.tiles.is_empty() {
        vec![geometry::image_name(sequence, None)]
    } else {
        (1..=geometry.tiles.len())
            .map(|t| geometry::image_name(sequence, Some(t)))
            .collect()
    };

    writer.dict_object(
        layout.page(),
        pdf::page(plan, layout, &geometry.media_box, &names),
    )?;

    let contents =
        geometry::content_stream(&geometry, sequence, layout.ext_gstate().is_some()).encode()?;
    writer.stream_object(
        layout.contents(),
        Dictionary::new(),
        &contents,
        StreamLength::Indirect(layout.contents_length()),
    )?;

    if let Some(gs) = layout.ext_gstate() {
        writer.dict_object(gs, pdf::ext_gstate(layout))?;
        for (channel, table) in plan.transfer.iter().enumerate() {
            let (dict, data) = pdf::transfer_function(table);
            writer.stream_object(
                layout.transfer(channel as u32),
                dict,
                &data,
                StreamLength::Literal,
            )?;
        }
    }

    if let (Some(object), Some(palette)) = (layout.palette(), &plan.color.palette) {
        writer.stream_object(object, Dictionary::new(), &palette.entries, StreamLength::Literal)?;
    }

    if let (Some(object), Some(profile)) = (layout.icc(), &plan.icc_profile) {
        writer.stream_object(
            object,
            pdf::icc(&plan.color.base),
            profile,
            StreamLength::Literal,
        )?;
    }

    write_images(container, writer, page, &geometry, &names, options)?;

    let color_space = pdf::to_text(pdf::color_space(&plan.color, layout))?;
    log::info!(
        "page {} (directory {}): {}x{}, {:?} {:?}, {}, {} image(s)",
        sequence,
        page.directory,
        plan.directory.width,
        plan.directory.length,
        plan.mode,
        plan.codec,
        color_space,
        names.len()
    );

    Ok(PageReport {
        directory: page.directory,
        page_number: page.page_number,
        width: plan.directory.width,
        height: plan.directory.length,
        mode: format!("{:?}", plan.mode),
        codec: format!("{:?}", plan.codec),
        color_space,
        tiles: page.tile_count,
        first_object: layout.first,
    })
}

fn write_images<C, W>(
    container: &mut C,
    writer: &mut Writer<W>,
    page: &Page,
    geometry: &PageGeometry,
    names: &[String],
    options: &ConvertOptions,
) -> Result<()>
where
    C: Container + ?Sized,
    W: Write,
{
    let plan = &page.plan;
    let layout = &page.layout;
    let settings = EncodeSettings {
        quality: options.quality,
        deflate_level: options.deflate_level,
        predictor: options.predictor,
        ycbcr: plan.ycbcr_jpeg
            || (!plan.stages.ycbcr_to_rgb
                && plan.directory.photometric == Some(photometric::YCBCR)),
    };

    for (t, name) in names.iter().enumerate() {
        let tile = t as u32;
        let image = match &geometry.grid {
            Some(grid) => {
                let (width, height) = grid.tile_size(tile);
                if plan.mode == TranscodeMode::Raw && !grid.is_edge(tile) {
                    raw_image(raw_chunk(container, plan, tile)?, plan, width, height)
                } else {
                    let (data, shape) = pipeline::read_samples(container, plan, tile)?;
                    let (data, shape) = if grid.is_edge(tile) {
                        pipeline::collapse_edge(&data, shape, width, height)
                    } else {
                        (data, shape)
                    };
                    let encoded = codec::encode(plan.codec, &data, &shape, &settings)?;
                    recoded_image(encoded, plan, width, height)
                }
            }
            None => match plan.mode {
                TranscodeMode::Raw => raw_image(
                    raw_strips(container, plan)?,
                    plan,
                    plan.directory.width,
                    plan.directory.length,
                ),
                TranscodeMode::Recode => {
                    let (data, shape) = read_strips(container, plan)?;
                    let encoded = codec::encode(plan.codec, &data, &shape, &settings)?;
                    recoded_image(encoded, plan, shape.width, shape.rows)
                }
            },
        };

        let params = ImageParams {
            name: name.clone(),
            ..image.params
        };
        writer.stream_object(
            layout.image(tile),
            pdf::image(plan, layout, &params, options.interpolate),
            &image.data,
            StreamLength::Indirect(layout.image_length(tile)),
        )?;
    }
    Ok(())
}

/// Image data with everything but its name decided.
struct ImageData {
    data: Vec<u8>,
    params: ImageParams,
}

fn raw_image(data: Vec<u8>, plan: &PagePlan, width: u32, height: u32) -> ImageData {
    ImageData {
        data,
        params: ImageParams {
            name: String::new(),
            width,
            height,
            codec: plan.codec,
            raw: true,
            predictor: plan.codec == OutputCompression::Deflate && plan.directory.predictor == 2,
        },
    }
}

fn recoded_image(encoded: Encoded, plan: &PagePlan, width: u32, height: u32) -> ImageData {
    ImageData {
        data: encoded.data,
        params: ImageParams {
            name: String::new(),
            width,
            height,
            codec: plan.codec,
            raw: false,
            predictor: encoded.predictor,
        },
    }
}

/// One compressed chunk, made self-contained: JPEG tables are merged in
/// and G4 bits are put in MSB-first order.
fn raw_chunk<C: Container + ?Sized>(container: &mut C, plan: &PagePlan, chunk: u32) -> Result<Vec<u8>> {
    let dir = &plan.directory;
    let mut data = container.read_raw_chunk(plan.index, chunk)?;
    match dir.compression {
        compression::JPEG => {
            if let Some(tables) = &dir.jpeg_tables {
                data = jpeg_splice::merge_tables(tables, &data)?;
            }
        }
        compression::CCITT_G4 if dir.fill_order == FILLORDER_LSB2MSB => {
            for b in &mut data {
                *b = b.reverse_bits();
            }
        }
        _ => {}
    }
    Ok(data)
}

/// Compressed data of a stripped page; JPEG strips are spliced into one
/// stream.
fn raw_strips<C: Container + ?Sized>(container: &mut C, plan: &PagePlan) -> Result<Vec<u8>> {
    let dir = &plan.directory;
    let count = dir.chunk_count();
    if dir.compression == compression::JPEG && count > 1 {
        let strips = (0..count)
            .map(|s| container.read_raw_chunk(plan.index, s))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("directory {}: splicing {} JPEG strips", plan.index, count);
        return jpeg_splice::splice_strips(&strips, dir.length, dir.jpeg_tables.as_deref());
    }
    raw_chunk(container, plan, 0)
}

/// Decoded samples of a whole stripped page.
fn read_strips<C: Container + ?Sized>(
    container: &mut C,
    plan: &PagePlan,
) -> Result<(Vec<u8>, SampleShape)> {
    let strips = plan.directory.chunks_per_plane();
    let mut data = Vec::new();
    let mut shape = None;
    for strip in 0..strips {
        let (samples, strip_shape) = pipeline::read_samples(container, plan, strip)?;
        data.extend_from_slice(&samples);
        shape.get_or_insert(strip_shape);
    }
    let shape = shape.ok_or_else(|| ConvertError::container(plan.index, "image has no strips"))?;
    Ok((
        data,
        SampleShape {
            rows: plan.directory.length,
            ..shape
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{MemoryContainer, PLANAR_SEPARATE};

    fn options() -> ConvertOptions {
        ConvertOptions {
            datetime: Some("D:20240102030405".to_string()),
            ..Default::default()
        }
    }

    fn gray(width: u32, length: u32) -> Directory {
        Directory {
            width,
            length,
            bits_per_sample: 8,
            samples_per_pixel: 1,
            photometric: Some(photometric::MIN_IS_BLACK),
            x_resolution: Some(72.0),
            y_resolution: Some(72.0),
            ..Default::default()
        }
    }

    fn render(container: &mut MemoryContainer, options: &ConvertOptions) -> (String, ConvertResult) {
        let mut out = Vec::new();
        let result = convert(container, &mut out, options).unwrap();
        (String::from_utf8_lossy(&out).into_owned(), result)
    }

    #[test]
    fn test_single_gray_page() {
        let mut container = MemoryContainer::new();
        container.push_uncompressed(gray(4, 2), vec![vec![0, 64, 128, 255, 1, 2, 3, 4]]);
        let (text, result) = render(&mut container, &options());

        assert_eq!(result.page_count, 1);
        assert_eq!(result.object_count, 8);
        assert_eq!(result.pdf_version, "1.1");
        assert!(text.starts_with("%PDF-1.1\n"));
        assert!(text.contains("/MediaBox[0 0 4 2]"));
        assert!(text.contains("/Width 4/Height 2/BitsPerComponent 8/ColorSpace/DeviceGray"));
        assert!(text.contains("stream\nq\n4 0 0 2 0 0 cm\n/Im1 Do\nQ\nendstream"));
        assert!(text.contains("/CreationDate(D:20240102030405)"));
        assert!(text.contains("xref\n0 9\n"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn test_measure_matches_convert() {
        let mut container = MemoryContainer::new();
        container.push_uncompressed(gray(3, 3), vec![vec![9; 9]]);
        container.push_uncompressed(gray(2, 2), vec![vec![1; 4]]);
        let options = ConvertOptions {
            compression: OutputCompression::Deflate,
            ..options()
        };
        let (_, result) = render(&mut container, &options);
        assert_eq!(measure(&mut container, &options).unwrap(), result.bytes_written);
        assert_eq!(result.pdf_version, "1.2");
    }

    #[test]
    fn test_info_falls_back_to_tags() {
        let mut dir = gray(1, 1);
        dir.software = Some("scanner 2.0".to_string());
        dir.copyright = Some("ACME".to_string());
        dir.image_description = Some("  ".to_string());
        dir.date_time = Some("2021:05:06 07:08:09".to_string());
        let mut container = MemoryContainer::new();
        container.push_uncompressed(dir, vec![vec![0]]);

        let (text, _) = render(
            &mut container,
            &ConvertOptions {
                title: Some("Report".to_string()),
                ..Default::default()
            },
        );
        assert!(text.contains("/Creator(scanner 2.0)"));
        assert!(text.contains("/Author(ACME)"));
        assert!(text.contains("/Title(Report)"));
        assert!(!text.contains("/Subject"));
        assert!(text.contains("/CreationDate(D:20210506070809)"));
    }

    #[test]
    fn test_file_id_is_deterministic() {
        let mut container = MemoryContainer::new();
        container.push_uncompressed(gray(1, 1), vec![vec![0]]);
        let (a, _) = render(&mut container, &options());
        let (b, _) = render(&mut container, &options());
        assert_eq!(a, b);

        let fixed = ConvertOptions {
            file_id: Some("0123456789abcdef0123456789abcdef".to_string()),
            ..options()
        };
        let (c, _) = render(&mut container, &fixed);
        assert!(c.contains("/ID [<0123456789abcdef0123456789abcdef><0123456789abcdef0123456789abcdef>]"));
    }

    #[test]
    fn test_empty_container_has_no_pages() {
        let mut container = MemoryContainer::new();
        let mut out = Vec::new();
        assert!(matches!(
            convert(&mut container, &mut out, &options()),
            Err(ConvertError::NoPages)
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_quality_fails_before_output() {
        let mut container = MemoryContainer::new();
        container.push_uncompressed(gray(1, 1), vec![vec![0]]);
        let bad = ConvertOptions {
            quality: 0,
            ..options()
        };
        let mut out = Vec::new();
        assert!(matches!(
            convert(&mut container, &mut out, &bad),
            Err(ConvertError::InvalidQuality)
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_tiled_page_writes_one_image_per_tile() {
        let mut dir = gray(3, 3);
        dir.tile_size = Some((2, 2));
        let tiles = vec![vec![1; 4], vec![2; 4], vec![3; 4], vec![4; 4]];
        let mut container = MemoryContainer::new();
        container.push_uncompressed(dir, tiles);

        let (text, result) = render(&mut container, &options());
        assert_eq!(result.pages[0].tiles, 4);
        assert_eq!(result.object_count, 3 + 5 + 2 * 3);
        for t in 1..=4 {
            assert!(text.contains(&format!("/Im1_{} Do", t)));
        }
        // The right edge tile is cut to one column.
        assert!(text.contains("/Name/Im1_2/Width 1/Height 2"));
        assert!(text.contains("/Name/Im1_4/Width 1/Height 1"));
    }

    #[test]
    fn test_planar_rgb_is_interleaved() {
        let dir = Directory {
            width: 2,
            length: 1,
            bits_per_sample: 8,
            samples_per_pixel: 3,
            planar_config: PLANAR_SEPARATE,
            photometric: Some(photometric::RGB),
            ..Default::default()
        };
        let mut container = MemoryContainer::new();
        container.push_uncompressed(dir, vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
        let mut out = Vec::new();
        convert(&mut container, &mut out, &options()).unwrap();

        let needle = b"stream\n\x01\x03\x05\x02\x04\x06\nendstream";
        assert!(out.windows(needle.len()).any(|w| w == needle));
    }
}
