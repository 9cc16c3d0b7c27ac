// Text extraction for PDF responses

use crate::error::FetchError;
use crate::fetcher::{ExtractedText, TextExtractor};
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Content types treated as PDF, matched on the lowercase essence
pub const PDF_CONTENT_TYPES: [&str; 6] = [
    "application/pdf",
    "application/x-pdf",
    "application/acrobat",
    "applications/vnd.pdf",
    "text/pdf",
    "text/x-pdf",
];

/// [`TextExtractor`] backed by `pdf-extract`. One page of text per PDF page,
/// joined with blank lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PdfTextExtractor {
    fn supports(&self, content_type: &str) -> bool {
        PDF_CONTENT_TYPES.contains(&content_type)
    }

    fn extract(&self, url: &str, body: &[u8]) -> Result<ExtractedText, FetchError> {
        let extraction_error = |reason: String| FetchError::Extraction {
            url: url.to_string(),
            reason,
        };

        // The parser panics on some malformed documents
        let pages = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(body)
        }))
        .map_err(|_| extraction_error("PDF parser aborted on malformed input".to_string()))?
        .map_err(|e| extraction_error(e.to_string()))?;

        debug!("Extracted {} pages from {}", pages.len(), url);
        let text = pages
            .iter()
            .map(|page| page.trim())
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ExtractedText {
            text,
            page_count: u32::try_from(pages.len()).ok(),
            title: None,
        })
    }
}
