//! ParsedPaper production from raw PDFs.
//!
//! Page-level failures are recovered locally: a page the backend cannot
//! extract contributes empty content and flips the paper's status to
//! `partial`. Only an unreadable document yields `failed` — and even
//! that is not pipeline-fatal, the paper is simply excluded downstream.

pub mod section;

use std::path::Path;

use sotaboard_core::store::{RunStore, StoreError};
use sotaboard_core::{ParseStatus, ParsedPaper, PdfBackend};

pub use section::{collect_captions, segment_sections};

/// Parse one PDF into a [`ParsedPaper`]. Never returns an error: total
/// failure is encoded as [`ParseStatus::Failed`] with a reason.
pub fn parse_paper(
    paper_id: &str,
    pdf_path: &Path,
    backend: &dyn PdfBackend,
    max_pages: Option<usize>,
) -> ParsedPaper {
    let pages = match backend.extract_pages(pdf_path) {
        Ok(pages) => pages,
        Err(e) => {
            tracing::warn!(paper_id, error = %e, "document unreadable");
            return ParsedPaper::failed(paper_id, e.to_string());
        }
    };

    let page_count = pages.len();
    if page_count == 0 {
        return ParsedPaper::failed(paper_id, "document has no pages");
    }

    let taken = match max_pages {
        Some(cap) => &pages[..page_count.min(cap)],
        None => &pages[..],
    };

    let pages_failed = taken.iter().filter(|p| p.is_none()).count();
    if pages_failed == taken.len() {
        return ParsedPaper::failed(paper_id, "no page yielded any text");
    }

    let full_text = taken
        .iter()
        .map(|p| p.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    let status = if pages_failed > 0 {
        tracing::debug!(paper_id, pages_failed, "partial parse");
        ParseStatus::Partial
    } else {
        ParseStatus::Ok
    };

    ParsedPaper {
        paper_id: paper_id.to_string(),
        status,
        failure_reason: None,
        sections: segment_sections(&full_text),
        captions: collect_captions(&full_text),
        full_text,
        page_count,
        pages_failed,
    }
}

/// Cache-aware variant: a valid cached entry short-circuits parsing;
/// otherwise the paper is parsed and the result persisted (success,
/// partial, or failed alike — the terminal state is always recorded).
pub fn parse_paper_cached(
    paper_id: &str,
    pdf_path: &Path,
    backend: &dyn PdfBackend,
    max_pages: Option<usize>,
    store: &RunStore,
) -> Result<ParsedPaper, StoreError> {
    if let Some(cached) = store.load_parsed(paper_id) {
        tracing::debug!(paper_id, "parsed cache hit");
        return Ok(cached);
    }
    let paper = parse_paper(paper_id, pdf_path, backend, max_pages);
    store.write_parsed(&paper)?;
    Ok(paper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sotaboard_core::BackendError;

    /// Scripted backend: pages as given, or a whole-document error.
    struct FakeBackend {
        pages: Result<Vec<Option<String>>, String>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl FakeBackend {
        fn pages(pages: Vec<Option<&str>>) -> Self {
            Self {
                pages: Ok(pages
                    .into_iter()
                    .map(|p| p.map(|s| s.to_string()))
                    .collect()),
                calls: Default::default(),
            }
        }

        fn unreadable(reason: &str) -> Self {
            Self {
                pages: Err(reason.to_string()),
                calls: Default::default(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl PdfBackend for FakeBackend {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<Option<String>>, BackendError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match &self.pages {
                Ok(pages) => Ok(pages.clone()),
                Err(reason) => Err(BackendError::Open(reason.clone())),
            }
        }
    }

    const PAGE: &str = "1 Introduction\nSome introductory text that is long enough to be kept as a real section here.";

    #[test]
    fn clean_parse_is_ok() {
        let backend = FakeBackend::pages(vec![Some(PAGE), Some("more text")]);
        let paper = parse_paper("2301.00001", Path::new("x.pdf"), &backend, None);
        assert_eq!(paper.status, ParseStatus::Ok);
        assert_eq!(paper.page_count, 2);
        assert_eq!(paper.sections.len(), 1);
        assert!(paper.full_text.contains("more text"));
    }

    #[test]
    fn failed_page_recovers_as_partial() {
        let backend = FakeBackend::pages(vec![Some(PAGE), None, Some("tail")]);
        let paper = parse_paper("2301.00001", Path::new("x.pdf"), &backend, None);
        assert_eq!(paper.status, ParseStatus::Partial);
        assert_eq!(paper.pages_failed, 1);
        // The run continues with whatever text was recovered.
        assert!(paper.full_text.contains("tail"));
    }

    #[test]
    fn unreadable_document_is_failed_not_fatal() {
        let backend = FakeBackend::unreadable("bad xref table");
        let paper = parse_paper("2301.00001", Path::new("x.pdf"), &backend, None);
        assert_eq!(paper.status, ParseStatus::Failed);
        assert!(paper.failure_reason.as_deref().unwrap().contains("bad xref"));
        assert!(paper.full_text.is_empty());
    }

    #[test]
    fn all_pages_failing_is_failed() {
        let backend = FakeBackend::pages(vec![None, None]);
        let paper = parse_paper("2301.00001", Path::new("x.pdf"), &backend, None);
        assert_eq!(paper.status, ParseStatus::Failed);
    }

    #[test]
    fn max_pages_caps_extraction() {
        let backend = FakeBackend::pages(vec![Some("first page"), Some("second page")]);
        let paper = parse_paper("2301.00001", Path::new("x.pdf"), &backend, Some(1));
        assert!(paper.full_text.contains("first page"));
        assert!(!paper.full_text.contains("second page"));
        // page_count reflects the document, not the cap.
        assert_eq!(paper.page_count, 2);
    }

    #[test]
    fn cache_short_circuits_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let backend = FakeBackend::pages(vec![Some(PAGE)]);

        let first = parse_paper_cached("2301.00001", Path::new("x.pdf"), &backend, None, &store)
            .unwrap();
        assert_eq!(backend.call_count(), 1);

        let second = parse_paper_cached("2301.00001", Path::new("x.pdf"), &backend, None, &store)
            .unwrap();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(first.full_text, second.full_text);
    }

    #[test]
    fn invalidated_cache_triggers_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let backend = FakeBackend::pages(vec![Some(PAGE)]);

        parse_paper_cached("2301.00001", Path::new("x.pdf"), &backend, None, &store).unwrap();
        store.invalidate_parsed("2301.00001").unwrap();
        parse_paper_cached("2301.00001", Path::new("x.pdf"), &backend, None, &store).unwrap();
        assert_eq!(backend.call_count(), 2);
    }
}
