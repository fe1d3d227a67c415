//! PDF text and metadata extraction (§4.5 step 3).
//!
//! PDF only — this engine ingests PDFs exclusively. Per-page text is
//! required by §4.3's chunking strategies, so this module calls
//! `pdf_extract`'s page-splitting entry point rather than its
//! whole-document `extract_text_from_mem`. Title/author/page-count come from
//! the PDF's Info dictionary via `lopdf`, which `pdf_extract` does not
//! expose.

use std::collections::BTreeMap;

/// A PDF's extracted text, keyed by 1-indexed page number, plus metadata.
pub struct ExtractedBook {
    pub pages: BTreeMap<i32, String>,
    pub title: String,
    pub author: String,
    pub page_count: i32,
}

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    Metadata(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {e}"),
            ExtractError::Metadata(e) => write!(f, "PDF metadata extraction failed: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract per-page text and Info-dictionary metadata from a PDF's raw bytes.
///
/// Metadata fields default to an empty string / `0` rather than failing the
/// whole extraction — a missing `/Title` or `/Author` is common and must not
/// prevent ingestion (§4.5 step 3 treats metadata as best-effort).
pub fn extract_book(bytes: &[u8], fallback_title: &str) -> Result<ExtractedBook, ExtractError> {
    let page_texts =
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages = BTreeMap::new();
    for (idx, text) in page_texts.into_iter().enumerate() {
        pages.insert((idx + 1) as i32, text);
    }

    let (title, author, page_count) = match read_metadata(bytes) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(error = %e, "falling back to defaults for PDF metadata");
            (String::new(), String::new(), pages.len() as i32)
        }
    };

    let title = if title.is_empty() {
        fallback_title.to_string()
    } else {
        title
    };

    Ok(ExtractedBook {
        pages,
        title,
        author,
        page_count,
    })
}

fn read_metadata(bytes: &[u8]) -> Result<(String, String, i32), ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Metadata(e.to_string()))?;

    let page_count = doc.get_pages().len() as i32;

    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| obj.as_reference().ok())
        .and_then(|id| doc.get_object(id).ok())
        .and_then(|obj| obj.as_dict().ok());

    let title = info
        .and_then(|d| d.get(b"Title").ok())
        .and_then(|v| v.as_str().ok())
        .map(|b| lossy_pdf_string(b))
        .unwrap_or_default();

    let author = info
        .and_then(|d| d.get(b"Author").ok())
        .and_then(|v| v.as_str().ok())
        .map(|b| lossy_pdf_string(b))
        .unwrap_or_default();

    Ok((title, author, page_count))
}

fn lossy_pdf_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossy_pdf_string_trims_whitespace() {
        assert_eq!(lossy_pdf_string(b"  Hello World  "), "Hello World");
    }

    #[test]
    fn lossy_pdf_string_handles_invalid_utf8() {
        let out = lossy_pdf_string(&[0xff, 0xfe, b'A']);
        assert!(out.contains('A'));
    }
}
