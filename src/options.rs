//! Conversion options shared by the CLI, the WASM bindings and library users.

use serde::Deserialize;

use crate::error::{ConvertError, Result};

/// Codec used for pages that can't be passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCompression {
    #[default]
    None,
    Deflate,
    Jpeg,
    G4,
}

impl OutputCompression {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "deflate" | "zip" | "flate" => Some(Self::Deflate),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "g4" | "ccitt" => Some(Self::G4),
            _ => None,
        }
    }
}

/// Fixed output page size.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    Letter,
    Legal,
    A3,
    A4,
    A5,
    /// Width and length in points.
    Custom { width: f32, length: f32 },
}

impl PageSize {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "letter" => Some(Self::Letter),
            "legal" => Some(Self::Legal),
            "a3" => Some(Self::A3),
            "a4" => Some(Self::A4),
            "a5" => Some(Self::A5),
            _ => None,
        }
    }

    /// Width and length in points.
    pub fn points(&self) -> (f32, f32) {
        match *self {
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
            PageSize::A3 => (842.0, 1190.0),
            PageSize::A4 => (595.0, 842.0),
            PageSize::A5 => (420.0, 595.0),
            PageSize::Custom { width, length } => (width, length),
        }
    }
}

/// Options for TIFF to PDF conversion
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Copy compressed data unchanged when the PDF can carry it
    pub passthrough: bool,
    /// Codec for pages that have to be re-encoded
    pub compression: OutputCompression,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// zlib level for Deflate output (0-9)
    pub deflate_level: u32,
    /// Horizontal differencing for re-encoded 8-bit Deflate output
    pub predictor: bool,
    /// Fixed page size; the image is centered on it
    pub page_size: Option<PageSize>,
    /// Interpret unit-less resolutions as pixels per centimeter
    pub centimeters: bool,
    /// Resolution (x, y) used when the image has none
    pub resolution: Option<(f32, f32)>,
    /// Use `resolution` even when the image has one
    pub force_resolution: bool,
    /// Last-resort resolution in pixels per inch
    pub default_resolution: f32,
    /// Ask viewers to fit the window to the first page
    pub fit_window: bool,
    /// Ask viewers to interpolate images
    pub interpolate: bool,
    /// Emit CalGray/CalRGB when the image carries a white point
    pub calibrated: bool,
    pub creator: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    /// Creation date as a PDF date string (`D:YYYYMMDDHHMMSS`)
    pub datetime: Option<String>,
    /// 32 hex digits used for both halves of the trailer `/ID`
    pub file_id: Option<String>,
    pub producer: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            passthrough: true,
            compression: OutputCompression::None,
            quality: 75,
            deflate_level: 6,
            predictor: false,
            page_size: None,
            centimeters: false,
            resolution: None,
            force_resolution: false,
            default_resolution: 300.0,
            fit_window: false,
            interpolate: false,
            calibrated: false,
            creator: None,
            author: None,
            title: None,
            subject: None,
            keywords: None,
            datetime: None,
            file_id: None,
            producer: format!("tiff2pdf-rs {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn positive(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

impl ConvertOptions {
    /// Rejects option combinations the engine can't honor.
    pub fn validate(&self) -> Result<()> {
        if self.quality == 0 || self.quality > 100 {
            return Err(ConvertError::InvalidQuality);
        }
        if self.deflate_level > 9 {
            return Err(ConvertError::InvalidOptions(format!(
                "deflate level {} out of range 0-9",
                self.deflate_level
            )));
        }
        if let Some(PageSize::Custom { width, length }) = self.page_size {
            if !(positive(width) && positive(length)) {
                return Err(ConvertError::InvalidOptions(format!(
                    "invalid page size {}x{}",
                    width, length
                )));
            }
        }
        if let Some((x, y)) = self.resolution {
            if !(positive(x) && positive(y)) {
                return Err(ConvertError::InvalidOptions(format!(
                    "invalid resolution {}x{}",
                    x, y
                )));
            }
        }
        if !positive(self.default_resolution) {
            return Err(ConvertError::InvalidOptions(format!(
                "invalid default resolution {}",
                self.default_resolution
            )));
        }
        if let Some(id) = &self.file_id {
            if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConvertError::InvalidOptions(format!(
                    "file ID {:?} is not 32 hex digits",
                    id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConvertOptions::default();
        assert!(options.passthrough);
        assert_eq!(options.quality, 75);
        assert_eq!(options.default_resolution, 300.0);
        assert!(options.producer.starts_with("tiff2pdf-rs "));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_quality_range() {
        let options = ConvertOptions {
            quality: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ConvertError::InvalidQuality)));
        let options = ConvertOptions {
            quality: 101,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ConvertError::InvalidQuality)));
    }

    #[test]
    fn test_out_of_range_values_are_invalid_options() {
        let bad = [
            ConvertOptions {
                deflate_level: 10,
                ..Default::default()
            },
            ConvertOptions {
                page_size: Some(PageSize::Custom {
                    width: 0.0,
                    length: 792.0,
                }),
                ..Default::default()
            },
            ConvertOptions {
                resolution: Some((150.0, f32::NAN)),
                ..Default::default()
            },
            ConvertOptions {
                default_resolution: -1.0,
                ..Default::default()
            },
            ConvertOptions {
                file_id: Some("not-hex".to_string()),
                ..Default::default()
            },
        ];
        for options in bad {
            assert!(
                matches!(options.validate(), Err(ConvertError::InvalidOptions(_))),
                "{:?} should be rejected",
                options
            );
        }
    }

    #[test]
    fn test_page_size_names() {
        assert_eq!(PageSize::from_name("A4").map(|p| p.points()), Some((595.0, 842.0)));
        assert_eq!(PageSize::from_name("tabloid"), None);
        assert_eq!(OutputCompression::from_name("zip"), Some(OutputCompression::Deflate));
    }
}
