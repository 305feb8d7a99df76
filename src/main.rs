//! TIFF to PDF Converter CLI
//!
//! Command-line interface for converting TIFF files to PDF.

use anyhow::{bail, Context};
use clap::Parser;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use tiff2pdf::{
    convert, file_ops::convert_file, pdf::pdf_date_from_tiff, ConvertOptions, ConvertResult,
    OutputCompression, PageSize, TiffContainer,
};

const CM_PER_INCH: f32 = 2.54;
const POINTS_PER_INCH: f32 = 72.0;

/// Convert a TIFF image into a PDF document
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input TIFF file path
    #[arg(short, long)]
    input: PathBuf,

    /// Output PDF file path, `-` for stdout
    #[arg(short, long)]
    output: PathBuf,

    /// Decode and re-encode every image instead of copying compressed data
    #[arg(short, long)]
    no_passthrough: bool,

    /// Compression for re-encoded images: none, zip, jpeg or g4
    #[arg(short = 'z', long, default_value = "none")]
    compression: String,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value = "75")]
    quality: u8,

    /// zlib level for zip compression (0-9)
    #[arg(long, default_value = "6")]
    zip_level: u32,

    /// Apply the horizontal predictor to zip-compressed 8-bit images
    #[arg(long)]
    predictor: bool,

    /// Page size: letter, legal, a3, a4 or a5
    #[arg(short, long)]
    page_size: Option<String>,

    /// Page width in inches (centimeters with -u)
    #[arg(short, long)]
    width: Option<f32>,

    /// Page length in inches (centimeters with -u)
    #[arg(short, long)]
    length: Option<f32>,

    /// Use centimeters for sizes and unit-less resolutions
    #[arg(short = 'u', long)]
    centimeters: bool,

    /// Horizontal resolution in pixels per inch (per centimeter with -u)
    #[arg(short = 'x', long)]
    xres: Option<f32>,

    /// Vertical resolution in pixels per inch (per centimeter with -u)
    #[arg(short = 'y', long)]
    yres: Option<f32>,

    /// Use -x/-y even when the image has a resolution
    #[arg(short = 'r', long)]
    force_resolution: bool,

    /// Ask viewers to fit the window to the page
    #[arg(short, long)]
    fit_window: bool,

    /// Ask viewers to interpolate images
    #[arg(short = 'I', long)]
    interpolate: bool,

    /// Emit calibrated color spaces when the image has a white point
    #[arg(long)]
    calibrated: bool,

    /// Document creator
    #[arg(short, long)]
    creator: Option<String>,

    /// Document author
    #[arg(short, long)]
    author: Option<String>,

    /// Document title
    #[arg(short, long)]
    title: Option<String>,

    /// Document subject
    #[arg(short, long)]
    subject: Option<String>,

    /// Document keywords
    #[arg(short, long)]
    keywords: Option<String>,

    /// Creation date, `YYYY:MM:DD HH:MM:SS` or `D:YYYYMMDDHHMMSS`
    #[arg(short = 'e', long)]
    datetime: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn to_options(&self) -> anyhow::Result<ConvertOptions> {
        if self.quality == 0 || self.quality > 100 {
            bail!("quality must be between 1 and 100, got {}", self.quality);
        }
        let compression = OutputCompression::from_name(&self.compression)
            .with_context(|| format!("unknown compression {:?}", self.compression))?;
        let unit = if self.centimeters { CM_PER_INCH } else { 1.0 };

        let named = match &self.page_size {
            Some(name) => Some(
                PageSize::from_name(name).with_context(|| format!("unknown page size {:?}", name))?,
            ),
            None => None,
        };
        let page_size = if self.width.is_some() || self.length.is_some() {
            let (width, length) = named.unwrap_or(PageSize::Letter).points();
            Some(PageSize::Custom {
                width: self.width.map_or(width, |w| w * POINTS_PER_INCH / unit),
                length: self.length.map_or(length, |l| l * POINTS_PER_INCH / unit),
            })
        } else {
            named
        };

        let resolution = match (self.xres, self.yres) {
            (None, None) => None,
            (x, y) => {
                let x = x.or(y).unwrap_or_default() * unit;
                let y = y.or(self.xres).unwrap_or_default() * unit;
                Some((x, y))
            }
        };

        let datetime = match &self.datetime {
            Some(date) if date.starts_with("D:") => Some(date.clone()),
            Some(date) => Some(
                pdf_date_from_tiff(date).with_context(|| format!("can't parse date {:?}", date))?,
            ),
            None => None,
        };

        Ok(ConvertOptions {
            passthrough: !self.no_passthrough,
            compression,
            quality: self.quality,
            deflate_level: self.zip_level,
            predictor: self.predictor,
            page_size,
            centimeters: self.centimeters,
            resolution,
            force_resolution: self.force_resolution,
            fit_window: self.fit_window,
            interpolate: self.interpolate,
            calibrated: self.calibrated,
            creator: self.creator.clone(),
            author: self.author.clone(),
            title: self.title.clone(),
            subject: self.subject.clone(),
            keywords: self.keywords.clone(),
            datetime,
            ..ConvertOptions::default()
        })
    }
}

fn convert_to_stdout(args: &Args, options: &ConvertOptions) -> anyhow::Result<ConvertResult> {
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {:?}", args.input))?;
    let mut container = TiffContainer::new(bytes)
        .with_context(|| format!("failed to open {:?}", args.input))?;
    let stdout = io::stdout();
    let result = convert(&mut container, BufWriter::new(stdout.lock()), options)?;
    Ok(result)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    let options = args.to_options()?;

    let result = if args.output.as_os_str() == "-" {
        convert_to_stdout(&args, &options)?
    } else {
        convert_file(&args.input, &args.output, &options)
            .with_context(|| format!("failed to convert {:?} to {:?}", args.input, args.output))?
    };

    log::info!(
        "Done! Wrote {} page(s), {} objects, {} bytes (PDF {})",
        result.page_count,
        result.object_count,
        result.bytes_written,
        result.pdf_version
    );
    if args.output.as_os_str() != "-" {
        log::info!("Output saved to: {:?}", args.output);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["tiff2pdf", "-i", "in.tif", "-o", "out.pdf"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let options = parse(&[]).to_options().unwrap();
        assert!(options.passthrough);
        assert_eq!(options.compression, OutputCompression::None);
        assert_eq!(options.page_size, None);
        assert_eq!(options.resolution, None);
    }

    #[test]
    fn test_sizes_in_centimeters() {
        let options = parse(&["-u", "-w", "2.54", "-x", "10"]).to_options().unwrap();
        match options.page_size {
            Some(PageSize::Custom { width, length }) => {
                assert!((width - 72.0).abs() < 1e-3);
                assert_eq!(length, 792.0);
            }
            other => panic!("unexpected page size {:?}", other),
        }
        let (x, y) = options.resolution.unwrap();
        assert!((x - 25.4).abs() < 1e-4);
        assert!((y - 25.4).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["-q", "0"]).to_options().is_err());
        assert!(parse(&["-z", "lzw"]).to_options().is_err());
        assert!(parse(&["-p", "b5"]).to_options().is_err());
        assert!(parse(&["-e", "yesterday"]).to_options().is_err());
    }

    #[test]
    fn test_datetime_forms() {
        let tiff = parse(&["-e", "2020:01:02 03:04:05"]).to_options().unwrap();
        assert_eq!(tiff.datetime.as_deref(), Some("D:20200102030405"));
        let pdf = parse(&["-e", "D:19991231235959"]).to_options().unwrap();
        assert_eq!(pdf.datetime.as_deref(), Some("D:19991231235959"));
    }
}
