//! Pluggable text extractors.

use std::path::Path;

use docpipe_models::{DocumentMetadata, PageText};
use lopdf::{Dictionary, Object};
use tracing::{debug, warn};

use crate::error::{ExtractionError, ExtractionResult};

/// Text and metadata read from one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub metadata: DocumentMetadata,
    /// All pages, each preceded by a page marker
    pub full_text: String,
    pub pages: Vec<PageText>,
}

impl ExtractedDocument {
    fn from_pages(mut metadata: DocumentMetadata, pages: Vec<PageText>) -> Self {
        let mut full_text = String::new();
        for page in &pages {
            full_text.push_str(&page_marker(page.page_number));
            full_text.push_str(&page.text);
        }
        metadata.pages = pages.len() as u32;
        Self {
            metadata,
            full_text,
            pages,
        }
    }
}

fn page_marker(page_number: u32) -> String {
    format!("\n\n--- Page {} ---\n\n", page_number)
}

/// Reads a stored document into text. Runs on a blocking thread.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> ExtractionResult<ExtractedDocument>;
}

/// Pick an extractor from the file extension.
pub fn extractor_for(path: &Path) -> ExtractionResult<Box<dyn TextExtractor>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => Ok(Box::new(PdfExtractor)),
        "txt" | "md" => Ok(Box::new(PlainTextExtractor)),
        other => Err(ExtractionError::Unsupported(if other.is_empty() {
            path.display().to_string()
        } else {
            other.to_string()
        })),
    }
}

/// PDF extraction via `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> ExtractionResult<ExtractedDocument> {
        let bytes = std::fs::read(path).map_err(|source| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = lopdf::Document::load_mem(&bytes)
            .map_err(|e| ExtractionError::corrupt(e.to_string()))?;

        let info = info_dict(&doc);
        let metadata = DocumentMetadata {
            pages: 0,
            title: info_field(info, b"Title"),
            author: info_field(info, b"Author"),
            subject: info_field(info, b"Subject"),
            keywords: info_field(info, b"Keywords"),
        };

        // get_pages is keyed by page number, so iteration is in page order.
        let pages = doc
            .get_pages()
            .keys()
            .map(|&page_number| {
                let text = doc.extract_text(&[page_number]).unwrap_or_else(|e| {
                    warn!("No text extracted from page {}: {}", page_number, e);
                    String::new()
                });
                PageText { page_number, text }
            })
            .collect::<Vec<_>>();

        debug!("Extracted {} pages from {}", pages.len(), path.display());
        Ok(ExtractedDocument::from_pages(metadata, pages))
    }
}

fn info_dict(doc: &lopdf::Document) -> Option<&Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    let object = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    object.as_dict().ok()
}

fn info_field(info: Option<&Dictionary>, key: &[u8]) -> String {
    match info.and_then(|dict| dict.get(key).ok()) {
        Some(Object::String(bytes, _)) => decode_text_string(bytes),
        _ => String::new(),
    }
}

/// Decode a PDF text string: UTF-16BE with a byte order mark, otherwise
/// treated as single-byte Latin-1.
fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Plain UTF-8 text as a single page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> ExtractionResult<ExtractedDocument> {
        let bytes = std::fs::read(path).map_err(|source| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ExtractionError::corrupt(format!("not valid UTF-8: {}", e)))?;

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let metadata = DocumentMetadata {
            title,
            ..Default::default()
        };
        Ok(ExtractedDocument::from_pages(
            metadata,
            vec![PageText {
                page_number: 1,
                text,
            }],
        ))
    }
}
