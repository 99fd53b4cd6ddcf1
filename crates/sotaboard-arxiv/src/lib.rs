//! arXiv collaborators: the bulk metadata snapshot and the PDF source.
//!
//! Both are specified at their interface only — the snapshot is any
//! JSON-lines file of paper metadata, and the PDF source is any HTTP
//! endpoint serving `{base_url}/{id}.pdf` (configurable so tests never
//! touch the real service).

pub mod fetcher;
pub mod snapshot;

pub use fetcher::{ArxivSource, FetchError, FetchReport};
pub use snapshot::SnapshotReader;

/// Strip an optional `arxiv:` prefix and surrounding whitespace.
pub fn normalize_id(id: &str) -> String {
    let trimmed = id.trim();
    match trimmed.get(..6) {
        Some(prefix) if prefix.eq_ignore_ascii_case("arxiv:") => trimmed[6..].trim().to_string(),
        _ => trimmed.to_string(),
    }
}
