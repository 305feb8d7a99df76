//! WebAssembly bindings for the TIFF to PDF converter

use wasm_bindgen::prelude::*;
use crate::{convert_bytes, ConvertOptions};

/// Forwards `log` records to the browser console.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&message),
            log::Level::Warn => web_sys::console::warn_1(&message),
            log::Level::Info => web_sys::console::info_1(&message),
            _ => web_sys::console::debug_1(&message),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Initialize panic hook and console logging
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Warn);
    }
}

/// Turn console logging up to `debug` (or back down to `warn`)
#[wasm_bindgen]
pub fn set_verbose(verbose: bool) {
    log::set_max_level(if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });
}

fn parse_options(options_json: Option<String>) -> Result<ConvertOptions, JsError> {
    match options_json.as_deref().map(str::trim) {
        None | Some("") => Ok(ConvertOptions::default()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| JsError::new(&format!("invalid options: {}", e))),
    }
}

/// Convert a TIFF file to PDF
///
/// # Arguments
/// * `tiff_bytes` - The input TIFF file as a byte array
/// * `options_json` - Optional JSON object with conversion options, e.g.
///   `{"compression": "jpeg", "quality": 80, "page_size": "a4"}`
///
/// # Returns
/// The PDF as a byte array, or throws an error
#[wasm_bindgen]
pub fn convert_tiff(tiff_bytes: &[u8], options_json: Option<String>) -> Result<Vec<u8>, JsError> {
    let options = parse_options(options_json)?;
    let (output_bytes, _result) = convert_bytes(tiff_bytes, &options)
        .map_err(|e| JsError::new(&e.to_string()))?;
    Ok(output_bytes)
}

/// Convert a TIFF file to PDF with a per-page report
///
/// # Returns
/// A `ConvertResultJs` object containing the PDF and conversion details
#[wasm_bindgen]
pub fn convert_tiff_with_info(
    tiff_bytes: &[u8],
    options_json: Option<String>,
) -> Result<ConvertResultJs, JsError> {
    let options = parse_options(options_json)?;
    let (output_bytes, result) = convert_bytes(tiff_bytes, &options)
        .map_err(|e| JsError::new(&e.to_string()))?;

    let pages_json = serde_json::to_string(&result.pages).unwrap_or_else(|_| "[]".to_string());

    Ok(ConvertResultJs {
        pdf_bytes: output_bytes,
        page_count: result.page_count,
        object_count: result.object_count,
        pdf_version: result.pdf_version,
        pages_json,
    })
}

/// Result of a conversion with statistics
#[wasm_bindgen]
pub struct ConvertResultJs {
    pdf_bytes: Vec<u8>,
    page_count: usize,
    object_count: u32,
    pdf_version: String,
    pages_json: String,
}

#[wasm_bindgen]
impl ConvertResultJs {
    /// Get the PDF bytes
    #[wasm_bindgen(getter)]
    pub fn pdf_bytes(&self) -> Vec<u8> {
        self.pdf_bytes.clone()
    }

    /// Get the number of pages written
    #[wasm_bindgen(getter)]
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Get the number of PDF objects
    #[wasm_bindgen(getter)]
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    /// Get the PDF version, e.g. "1.3"
    #[wasm_bindgen(getter)]
    pub fn pdf_version(&self) -> String {
        self.pdf_version.clone()
    }

    /// Get per-page details as JSON string
    #[wasm_bindgen(getter)]
    pub fn pages_json(&self) -> String {
        self.pages_json.clone()
    }
}
