//! PDF objects of the document, built as lopdf values.
//!
//! Everything here returns [`Dictionary`] or [`Object`] values; the
//! [`Writer`] serializes them with [`encode`] and owns the object framing.
//!
//! [`Writer`]: crate::writer::Writer

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, StringFormat};

use crate::classify::{Calibration, ColorBase, ColorSpace, PagePlan};
use crate::container::photometric;
use crate::error::Result;
use crate::geometry::Rect;
use crate::options::OutputCompression;
use crate::scanner::{PageLayout, PAGES_OBJECT};

/// Serializes one direct object in PDF syntax.
pub fn encode(object: Object) -> Result<Vec<u8>> {
    // lopdf only exposes its object writer through content operands.
    let content = Content {
        operations: vec![Operation::new("", vec![object])],
    };
    let mut bytes = content.encode()?;
    bytes.pop();
    Ok(bytes)
}

/// [`encode`] for objects shown in logs and page reports.
pub fn to_text(object: Object) -> Result<String> {
    Ok(String::from_utf8_lossy(&encode(object)?).into_owned())
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

fn reference(object: u32) -> Object {
    Object::Reference((object, 0))
}

pub fn literal_string(value: &str) -> Object {
    Object::String(value.as_bytes().to_vec(), StringFormat::Literal)
}

/// Converts a TIFF `YYYY:MM:DD HH:MM:SS` timestamp to `D:YYYYMMDDHHMMSS`.
pub fn pdf_date_from_tiff(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 14 {
        return None;
    }
    Some(format!("D:{}", &digits[..14]))
}

fn reals(values: &[f32]) -> Object {
    Object::Array(values.iter().map(|&v| Object::Real(v)).collect())
}

fn rect(r: &Rect) -> Object {
    reals(&[r.x1, r.y1, r.x2, r.y2])
}

pub fn catalog(fit_window: bool) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("Catalog"));
    dict.set("Pages", reference(PAGES_OBJECT));
    if fit_window {
        let mut preferences = Dictionary::new();
        preferences.set("FitWindow", Object::Boolean(true));
        dict.set("ViewerPreferences", Object::Dictionary(preferences));
    }
    dict
}

/// Document information entries.
#[derive(Debug, Clone, Default)]
pub struct Info {
    pub date: String,
    pub producer: String,
    pub creator: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
}

impl Info {
    pub fn dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("CreationDate", literal_string(&self.date));
        dict.set("ModDate", literal_string(&self.date));
        dict.set("Producer", literal_string(&self.producer));
        let optional = [
            ("Creator", &self.creator),
            ("Author", &self.author),
            ("Title", &self.title),
            ("Subject", &self.subject),
            ("Keywords", &self.keywords),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                dict.set(key, literal_string(value));
            }
        }
        dict
    }
}

pub fn pages(kids: &[u32]) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("Pages"));
    dict.set("Kids", Object::Array(kids.iter().map(|&k| reference(k)).collect()));
    dict.set("Count", Object::Integer(kids.len() as i64));
    dict
}

pub fn page(plan: &PagePlan, layout: &PageLayout, media_box: &Rect, image_names: &[String]) -> Dictionary {
    let mut xobjects = Dictionary::new();
    for (t, image) in image_names.iter().enumerate() {
        xobjects.set(image.as_str(), reference(layout.image(t as u32)));
    }

    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));
    if let Some(gs) = layout.ext_gstate() {
        let mut states = Dictionary::new();
        states.set("GS1", reference(gs));
        resources.set("ExtGState", Object::Dictionary(states));
    }
    let image_kind = if plan.color.base.is_gray() && plan.color.palette.is_none() {
        "ImageB"
    } else {
        "ImageC"
    };
    let mut proc_set = vec![name("PDF"), name(image_kind)];
    if plan.color.palette.is_some() {
        proc_set.push(name("ImageI"));
    }
    resources.set("ProcSet", Object::Array(proc_set));

    let mut dict = Dictionary::new();
    dict.set("Type", name("Page"));
    dict.set("Parent", reference(PAGES_OBJECT));
    dict.set("MediaBox", rect(media_box));
    dict.set("Contents", reference(layout.contents()));
    dict.set("Resources", Object::Dictionary(resources));
    dict
}

/// `/ColorSpace` value of the page's images.
pub fn color_space(color: &ColorSpace, layout: &PageLayout) -> Object {
    let family = |family: &str, params: Dictionary| {
        Object::Array(vec![name(family), Object::Dictionary(params)])
    };
    let base = match (layout.icc(), &color.calibration, &color.base) {
        (Some(icc), _, _) => Object::Array(vec![name("ICCBased"), reference(icc)]),
        (None, Some(Calibration::Gray { white_point, gamma }), _) => {
            let mut params = Dictionary::new();
            params.set("WhitePoint", reals(white_point));
            params.set("Gamma", Object::Real(*gamma));
            family("CalGray", params)
        }
        (None, Some(Calibration::Rgb { white_point, gamma, matrix }), _) => {
            let mut params = Dictionary::new();
            params.set("WhitePoint", reals(white_point));
            params.set("Gamma", reals(&[*gamma; 3]));
            params.set("Matrix", reals(matrix));
            family("CalRGB", params)
        }
        (None, None, ColorBase::Lab { range, white_point }) => {
            let mut params = Dictionary::new();
            params.set("WhitePoint", reals(white_point));
            params.set(
                "Range",
                Object::Array(range.iter().map(|&r| Object::Integer(i64::from(r))).collect()),
            );
            family("Lab", params)
        }
        (None, None, base) => name(base.device_name()),
    };

    match (&color.palette, layout.palette()) {
        (Some(palette), Some(object)) => Object::Array(vec![
            name("Indexed"),
            base,
            Object::Integer(palette.hival() as i64),
            reference(object),
        ]),
        _ => base,
    }
}

/// Per-image parameters of an image XObject.
#[derive(Debug, Clone)]
pub struct ImageParams {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub codec: OutputCompression,
    /// The data is the source's compressed bytes.
    pub raw: bool,
    /// TIFF horizontal differencing was applied to Deflate data.
    pub predictor: bool,
}

pub fn image(plan: &PagePlan, layout: &PageLayout, params: &ImageParams, interpolate: bool) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("XObject"));
    dict.set("Subtype", name("Image"));
    dict.set("Name", name(&params.name));
    dict.set("Width", Object::Integer(i64::from(params.width)));
    dict.set("Height", Object::Integer(i64::from(params.height)));
    dict.set("BitsPerComponent", Object::Integer(i64::from(plan.bits)));
    dict.set("ColorSpace", color_space(&plan.color, layout));
    if interpolate {
        dict.set("Interpolate", Object::Boolean(true));
    }
    if plan.invert && params.codec != OutputCompression::G4 {
        let pairs = (0..plan.components)
            .flat_map(|_| [Object::Integer(1), Object::Integer(0)])
            .collect();
        dict.set("Decode", Object::Array(pairs));
    }

    match params.codec {
        OutputCompression::None => {}
        OutputCompression::G4 => {
            let mut parms = Dictionary::new();
            parms.set("K", Object::Integer(-1));
            parms.set("Columns", Object::Integer(i64::from(params.width)));
            parms.set("Rows", Object::Integer(i64::from(params.height)));
            if !plan.invert {
                parms.set("BlackIs1", Object::Boolean(true));
            }
            dict.set("Filter", name("CCITTFaxDecode"));
            dict.set("DecodeParms", Object::Dictionary(parms));
        }
        OutputCompression::Deflate => {
            dict.set("Filter", name("FlateDecode"));
            if params.predictor {
                let mut parms = Dictionary::new();
                parms.set("Predictor", Object::Integer(2));
                parms.set("Colors", Object::Integer(i64::from(plan.components)));
                parms.set("BitsPerComponent", Object::Integer(i64::from(plan.bits)));
                parms.set("Columns", Object::Integer(i64::from(params.width)));
                dict.set("DecodeParms", Object::Dictionary(parms));
            }
        }
        OutputCompression::Jpeg => {
            dict.set("Filter", name("DCTDecode"));
            let stored_rgb = params.raw
                && plan.components == 3
                && plan.directory.photometric != Some(photometric::YCBCR);
            if stored_rgb {
                let mut parms = Dictionary::new();
                parms.set("ColorTransform", Object::Integer(0));
                dict.set("DecodeParms", Object::Dictionary(parms));
            }
        }
    }
    dict
}

pub fn ext_gstate(layout: &PageLayout) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("ExtGState"));
    if layout.transfer_count == 1 {
        dict.set("TR", reference(layout.transfer(0)));
    } else {
        let mut functions: Vec<Object> = (0..layout.transfer_count)
            .map(|c| reference(layout.transfer(c)))
            .collect();
        functions.push(name("Identity"));
        dict.set("TR", Object::Array(functions));
    }
    dict
}

/// Sampled transfer function dictionary and its big-endian samples.
pub fn transfer_function(table: &[u16]) -> (Dictionary, Vec<u8>) {
    let n = table.len() as i64;
    let mut dict = Dictionary::new();
    dict.set("FunctionType", Object::Integer(0));
    dict.set("Domain", reals(&[0.0, 1.0]));
    dict.set("Range", reals(&[0.0, 1.0]));
    dict.set("Size", Object::Array(vec![Object::Integer(n)]));
    dict.set("BitsPerSample", Object::Integer(16));
    dict.set(
        "Encode",
        Object::Array(vec![Object::Integer(0), Object::Integer((n - 1).max(0))]),
    );
    let data = table.iter().flat_map(|v| v.to_be_bytes()).collect();
    (dict, data)
}

pub fn icc(base: &ColorBase) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("N", Object::Integer(i64::from(base.components())));
    dict.set("Alternate", name(base.device_name()));
    dict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, Palette};
    use crate::container::{compression, Directory};
    use crate::options::ConvertOptions;

    fn planned(d: Directory) -> (PagePlan, PageLayout) {
        let plan = classify(&d, 0, &ConvertOptions::default()).unwrap();
        let layout = PageLayout::new(4, &plan);
        (plan, layout)
    }

    fn gray(photometric: u16, bits: u16) -> Directory {
        Directory {
            width: 8,
            length: 8,
            bits_per_sample: bits,
            photometric: Some(photometric),
            chunk_offsets: vec![8],
            ..Default::default()
        }
    }

    fn params(codec: OutputCompression, raw: bool) -> ImageParams {
        ImageParams {
            name: "Im1".into(),
            width: 8,
            height: 8,
            codec,
            raw,
            predictor: false,
        }
    }

    fn text(dict: Dictionary) -> String {
        to_text(Object::Dictionary(dict)).unwrap()
    }

    #[test]
    fn test_literal_string_escapes() {
        assert_eq!(encode(literal_string("a\\b)c")).unwrap(), b"(a\\\\b\\)c)".to_vec());
        assert_eq!(encode(literal_string("(x)")).unwrap(), b"((x))".to_vec());
        assert_eq!(encode(literal_string("\u{e9}")).unwrap(), b"(\xC3\xA9)".to_vec());
    }

    #[test]
    fn test_tiff_date() {
        assert_eq!(
            pdf_date_from_tiff("2021:03:04 05:06:07").as_deref(),
            Some("D:20210304050607")
        );
        assert_eq!(pdf_date_from_tiff("yesterday"), None);
    }

    #[test]
    fn test_info_dict_order() {
        let info = Info {
            date: "D:20200101000000".into(),
            producer: "p".into(),
            title: Some("t".into()),
            ..Default::default()
        };
        assert_eq!(
            text(info.dict()),
            "<</CreationDate(D:20200101000000)/ModDate(D:20200101000000)/Producer(p)/Title(t)>>"
        );
    }

    #[test]
    fn test_catalog_and_pages() {
        assert_eq!(text(catalog(false)), "<</Type/Catalog/Pages 3 0 R>>");
        assert!(text(catalog(true)).ends_with("/ViewerPreferences<</FitWindow true>>>>"));
        assert_eq!(
            text(pages(&[4, 12])),
            "<</Type/Pages/Kids[4 0 R 12 0 R]/Count 2>>"
        );
    }

    #[test]
    fn test_min_is_white_decode_array() {
        let (plan, layout) = planned(gray(photometric::MIN_IS_WHITE, 8));
        let dict = image(&plan, &layout, &params(OutputCompression::None, false), false);
        assert_eq!(dict.get(b"ColorSpace").unwrap(), &name("DeviceGray"));
        assert!(text(dict.clone()).contains("/Decode[1 0]"));
        assert!(!dict.has(b"Filter"));
    }

    #[test]
    fn test_g4_decode_parms() {
        let mut d = gray(photometric::MIN_IS_WHITE, 1);
        d.compression = compression::CCITT_G4;
        let (plan, layout) = planned(d);
        let dict = image(&plan, &layout, &params(OutputCompression::G4, true), false);
        assert!(text(dict.clone())
            .contains("/Filter/CCITTFaxDecode/DecodeParms<</K -1/Columns 8/Rows 8>>"));
        assert!(!dict.has(b"Decode"));

        let mut d = gray(photometric::MIN_IS_BLACK, 1);
        d.compression = compression::CCITT_G4;
        let (plan, layout) = planned(d);
        let dict = text(image(&plan, &layout, &params(OutputCompression::G4, true), true));
        assert!(dict.contains("/BlackIs1 true"));
        assert!(dict.contains("/Interpolate true"));
    }

    #[test]
    fn test_indexed_over_icc() {
        let mut d = gray(photometric::PALETTE, 1);
        d.color_map = Some(vec![0; 6]);
        d.icc_profile = Some(vec![0; 4]);
        let (plan, layout) = planned(d);
        assert_eq!(
            to_text(color_space(&plan.color, &layout)).unwrap(),
            "[/Indexed[/ICCBased 8 0 R] 1 7 0 R]"
        );
        let page = text(page(&plan, &layout, &Rect::new(0.0, 0.0, 8.0, 8.0), &["Im1".to_string()]));
        assert!(page.contains("/XObject<</Im1 9 0 R>>"));
        assert!(page.contains("/ProcSet[/PDF/ImageC/ImageI]"));
        assert!(page.contains("/MediaBox[0 0 8 8]"));
    }

    #[test]
    fn test_lab_color_space() {
        let lab = Directory {
            samples_per_pixel: 3,
            ..gray(photometric::CIELAB, 8)
        };
        let (plan, layout) = planned(lab);
        let space = to_text(color_space(&plan.color, &layout)).unwrap();
        assert!(space.starts_with("[/Lab<</WhitePoint[0.964"));
        assert!(space.ends_with("/Range[-127 127 -127 127]>>]"));
    }

    #[test]
    fn test_transfer_objects() {
        let layout = PageLayout {
            first: 4,
            tiles: 1,
            transfer_count: 3,
            palette: false,
            icc: false,
        };
        assert_eq!(
            text(ext_gstate(&layout)),
            "<</Type/ExtGState/TR[8 0 R 9 0 R 10 0 R/Identity]>>"
        );
        let (dict, data) = transfer_function(&[0, 0x1234, 0xFFFF, 7]);
        let dict = text(dict);
        assert!(dict.contains("/Size[4]"));
        assert!(dict.contains("/Encode[0 3]"));
        assert_eq!(data, vec![0, 0, 0x12, 0x34, 0xFF, 0xFF, 0, 7]);
    }

    #[test]
    fn test_palette_hival() {
        let palette = Palette {
            entries: vec![0; 12],
            channels: 4,
        };
        assert_eq!(palette.hival(), 2);
    }
}
