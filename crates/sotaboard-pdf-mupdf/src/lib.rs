use std::path::Path;

use mupdf::{Document, TextPageFlags};

use sotaboard_core::{BackendError, PdfBackend};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate is the sole AGPL island — it isolates the mupdf
/// dependency so non-PDF code paths do not transitively depend on it.
///
/// Extraction is page-by-page: a page that fails to convert is reported
/// as `None` so the caller can record a partial parse instead of losing
/// the document. Text in the bottom 5% of each page (footers) and top
/// 4% (headers) is excluded so proceedings footer lines do not end up
/// embedded mid-sentence when sections span page breaks.
pub struct MupdfBackend {
    /// Fraction of page height from bottom to exclude as footer
    /// (0.0–1.0). `None` disables footer exclusion.
    footer_exclusion_ratio: Option<f32>,
    /// Fraction of page height from top to exclude as header.
    header_exclusion_ratio: Option<f32>,
}

impl Default for MupdfBackend {
    fn default() -> Self {
        Self {
            footer_exclusion_ratio: Some(0.05),
            header_exclusion_ratio: Some(0.04),
        }
    }
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the footer exclusion ratio. Pass `0.0` to disable.
    pub fn with_footer_exclusion(mut self, ratio: f32) -> Self {
        self.footer_exclusion_ratio = if ratio > 0.0 { Some(ratio) } else { None };
        self
    }

    /// Set the header exclusion ratio. Pass `0.0` to disable.
    pub fn with_header_exclusion(mut self, ratio: f32) -> Self {
        self.header_exclusion_ratio = if ratio > 0.0 { Some(ratio) } else { None };
        self
    }

    fn extract_page(&self, page: &mupdf::Page) -> Result<String, BackendError> {
        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| BackendError::Extraction(e.to_string()))?;

        let page_bounds = page
            .bounds()
            .map_err(|e| BackendError::Extraction(e.to_string()))?;
        let page_height = page_bounds.y1 - page_bounds.y0;

        let header_threshold = self
            .header_exclusion_ratio
            .map(|r| page_bounds.y0 + page_height * r);
        let footer_threshold = self
            .footer_exclusion_ratio
            .map(|r| page_bounds.y1 - page_height * r);

        let mut page_text = String::new();
        for block in text_page.blocks() {
            let block_bounds = block.bounds();

            // Skip blocks entirely within the header region
            if let Some(threshold) = header_threshold
                && block_bounds.y1 <= threshold
            {
                continue;
            }

            // Skip blocks whose top edge is in the footer region
            if let Some(threshold) = footer_threshold
                && block_bounds.y0 >= threshold
            {
                continue;
            }

            for line in block.lines() {
                let line_text: String = line
                    .chars()
                    .map(|c| c.char().unwrap_or('\u{FFFD}'))
                    .collect();
                page_text.push_str(&line_text);
                page_text.push('\n');
            }
        }
        Ok(page_text)
    }
}

impl PdfBackend for MupdfBackend {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Option<String>>, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::Open("invalid path encoding".into()))?;

        let document = Document::open(path_str).map_err(|e| BackendError::Open(e.to_string()))?;

        let mut pages = Vec::new();
        for (index, page_result) in document
            .pages()
            .map_err(|e| BackendError::Open(e.to_string()))?
            .enumerate()
        {
            let page = match page_result {
                Ok(page) => page,
                Err(e) => {
                    tracing::debug!(page = index, error = %e, "page load failed, recording empty page");
                    pages.push(None);
                    continue;
                }
            };
            match self.extract_page(&page) {
                Ok(text) => pages.push(Some(text)),
                Err(e) => {
                    tracing::debug!(page = index, error = %e, "page extraction failed");
                    pages.push(None);
                }
            }
        }

        Ok(pages)
    }
}
