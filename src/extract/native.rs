//! Embedded text layer and PDF structure, via `pdf-extract` and `lopdf`.

use lopdf::{Dictionary, Document, Object};
use serde::Serialize;

use super::{ExtractError, TextLayer};

/// Reads the embedded text layer with `pdf-extract` and the page tree with
/// `lopdf`.
pub struct PdfTextLayer;

impl TextLayer for PdfTextLayer {
    fn pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))
    }

    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractError> {
        let doc = load(pdf_bytes)?;
        Ok(doc.get_pages().len())
    }
}

/// Structural facts about a PDF file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdfInfo {
    pub page_count: usize,
    pub has_text_layer: bool,
    pub encrypted: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
}

/// Page count, encryption flag and document-info strings.
///
/// `has_text_layer` is left `false`; the caller fills it in from the text
/// layer.
pub fn pdf_info(pdf_bytes: &[u8]) -> Result<PdfInfo, ExtractError> {
    let doc = load(pdf_bytes)?;
    let info = info_dict(&doc);

    Ok(PdfInfo {
        page_count: doc.get_pages().len(),
        has_text_layer: false,
        encrypted: doc.is_encrypted(),
        title: info.and_then(|d| info_string(d, b"Title")),
        author: info.and_then(|d| info_string(d, b"Author")),
        producer: info.and_then(|d| info_string(d, b"Producer")),
    })
}

fn load(pdf_bytes: &[u8]) -> Result<Document, ExtractError> {
    Document::load_mem(pdf_bytes).map_err(|e| ExtractError::Pdf(format!("failed to parse PDF: {e}")))
}

fn info_dict(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok(),
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

fn info_string(dict: &Dictionary, key: &[u8]) -> Option<String> {
    let Object::String(bytes, _) = dict.get(key).ok()? else {
        return None;
    };
    let text = decode_pdf_string(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Text strings are UTF-16BE with a BOM or a single-byte encoding.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        // Latin-1 is close enough to PDFDocEncoding for display
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
