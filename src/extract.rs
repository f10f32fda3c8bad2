//! PDF text extraction.
//!
//! Extraction is pipeline-layer: the reconciler hands over raw bytes and
//! gets plain UTF-8 text back, one entry per page when the extractor emits
//! form feeds between pages.

use std::path::Path;

use crate::error::{IngestError, Result};

pub const MIME_PDF: &str = "application/pdf";

/// Every PDF file starts with this header.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Turns document bytes into text.
pub trait Extractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

/// [`Extractor`] backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| IngestError::UnsupportedFormat(format!("PDF extraction failed: {}", e)))?;
        Ok(split_pages(&text))
    }
}

fn split_pages(text: &str) -> Vec<String> {
    text.split('\u{c}').map(str::to_string).collect()
}

/// True if `path` has a `.pdf` extension (any case) and `head` starts with
/// the PDF header.
pub fn is_pdf(path: &Path, head: &[u8]) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    ext_ok && head.starts_with(PDF_MAGIC)
}
