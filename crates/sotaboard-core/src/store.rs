//! On-disk run store: per-stage caches keyed by paper identifier.
//!
//! Layout under the store root:
//!
//! ```text
//! pdfs/{id}.pdf               downloaded source PDFs
//! parsed/{id}.json            cached ParsedPaper documents
//! extractions/v{N}/{id}.json  ExtractionResults per schema version
//! failed_downloads.json       ids that repeatedly failed to fetch
//! candidates.json             last candidate set (inspection only)
//! ```
//!
//! Every write goes to a temp file in the destination directory and is
//! renamed into place, so a concurrent reader never observes a partial
//! entry and an interrupted run leaves only complete artifacts behind.
//! A cache entry that fails to deserialize is treated as absent and
//! recomputed.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{ExtractionResult, PaperRecord, ParsedPaper};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle to the run's cache directory tree. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

/// Old-style arXiv ids contain a slash ("hep-th/9901001"); flatten it
/// so every id maps to a single file name.
fn id_to_filename(id: &str) -> String {
    id.replace('/', "_")
}

/// Write bytes to `path` atomically (temp file in the same directory,
/// then rename).
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable cache entry");
            None
        }
    }
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── PDFs ────────────────────────────────────────────────────────

    pub fn pdf_path(&self, id: &str) -> PathBuf {
        self.root.join("pdfs").join(format!("{}.pdf", id_to_filename(id)))
    }

    pub fn has_pdf(&self, id: &str) -> bool {
        self.pdf_path(id).is_file()
    }

    pub fn write_pdf(&self, id: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.pdf_path(id);
        atomic_write(&path, bytes)?;
        Ok(path)
    }

    // ── Parsed papers ───────────────────────────────────────────────

    pub fn parsed_path(&self, id: &str) -> PathBuf {
        self.root
            .join("parsed")
            .join(format!("{}.json", id_to_filename(id)))
    }

    pub fn load_parsed(&self, id: &str) -> Option<ParsedPaper> {
        load_json(&self.parsed_path(id))
    }

    pub fn write_parsed(&self, paper: &ParsedPaper) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(paper)?;
        atomic_write(&self.parsed_path(&paper.paper_id), &bytes)
    }

    pub fn invalidate_parsed(&self, id: &str) -> Result<(), StoreError> {
        let path = self.parsed_path(id);
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    // ── Extraction results ──────────────────────────────────────────

    fn extractions_dir(&self, schema_version: u32) -> PathBuf {
        self.root
            .join("extractions")
            .join(format!("v{schema_version}"))
    }

    pub fn extraction_path(&self, id: &str, schema_version: u32) -> PathBuf {
        self.extractions_dir(schema_version)
            .join(format!("{}.json", id_to_filename(id)))
    }

    pub fn has_extraction(&self, id: &str, schema_version: u32) -> bool {
        self.extraction_path(id, schema_version).is_file()
    }

    pub fn load_extraction(&self, id: &str, schema_version: u32) -> Option<ExtractionResult> {
        load_json(&self.extraction_path(id, schema_version))
    }

    pub fn write_extraction(&self, result: &ExtractionResult) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(result)?;
        atomic_write(
            &self.extraction_path(&result.paper_id, result.schema_version),
            &bytes,
        )
    }

    /// All readable extraction results for a schema version, ordered by
    /// paper id so downstream aggregation is deterministic.
    pub fn list_extractions(&self, schema_version: u32) -> Result<Vec<ExtractionResult>, StoreError> {
        let dir = self.extractions_dir(schema_version);
        let mut results: Vec<ExtractionResult> = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(result) = load_json::<ExtractionResult>(&path) {
                results.push(result);
            }
        }
        results.sort_by(|a, b| a.paper_id.cmp(&b.paper_id));
        Ok(results)
    }

    // ── Failed-download ledger ──────────────────────────────────────

    fn failed_downloads_path(&self) -> PathBuf {
        self.root.join("failed_downloads.json")
    }

    pub fn load_failed_downloads(&self) -> BTreeSet<String> {
        load_json(&self.failed_downloads_path()).unwrap_or_default()
    }

    pub fn save_failed_downloads(&self, failed: &BTreeSet<String>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(failed)?;
        atomic_write(&self.failed_downloads_path(), &bytes)
    }

    // ── Candidate set cache (inspection only, never authoritative) ──

    pub fn candidates_path(&self) -> PathBuf {
        self.root.join("candidates.json")
    }

    pub fn write_candidates(&self, candidates: &[PaperRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(candidates)?;
        atomic_write(&self.candidates_path(), &bytes)
    }

    pub fn load_candidates(&self) -> Option<Vec<PaperRecord>> {
        load_json(&self.candidates_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExtractionOutcome, ParseStatus};

    fn store() -> (tempfile::TempDir, RunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        (dir, store)
    }

    fn parsed(id: &str) -> ParsedPaper {
        ParsedPaper {
            paper_id: id.into(),
            status: ParseStatus::Ok,
            failure_reason: None,
            sections: Vec::new(),
            captions: Vec::new(),
            full_text: "text".into(),
            page_count: 1,
            pages_failed: 0,
        }
    }

    #[test]
    fn pdf_round_trip() {
        let (_dir, store) = store();
        assert!(!store.has_pdf("2301.00001"));
        let path = store.write_pdf("2301.00001", b"%PDF-1.5 data").unwrap();
        assert!(store.has_pdf("2301.00001"));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.5 data");
    }

    #[test]
    fn old_style_ids_flatten_to_one_file() {
        let (_dir, store) = store();
        let path = store.pdf_path("hep-th/9901001");
        assert!(path.to_string_lossy().contains("hep-th_9901001.pdf"));
    }

    #[test]
    fn parsed_round_trip_and_invalidate() {
        let (_dir, store) = store();
        store.write_parsed(&parsed("2301.00001")).unwrap();
        assert!(store.load_parsed("2301.00001").is_some());
        store.invalidate_parsed("2301.00001").unwrap();
        assert!(store.load_parsed("2301.00001").is_none());
    }

    #[test]
    fn corrupt_cache_entry_treated_as_absent() {
        let (_dir, store) = store();
        let path = store.parsed_path("2301.00001");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(store.load_parsed("2301.00001").is_none());
    }

    #[test]
    fn extraction_results_are_versioned() {
        let (_dir, store) = store();
        let result = ExtractionResult {
            paper_id: "2301.00001".into(),
            schema_version: 1,
            outcome: ExtractionOutcome::Refused,
        };
        store.write_extraction(&result).unwrap();
        assert!(store.has_extraction("2301.00001", 1));
        // A schema bump must not see v1 entries.
        assert!(!store.has_extraction("2301.00001", 2));
        assert_eq!(store.list_extractions(2).unwrap().len(), 0);
    }

    #[test]
    fn list_extractions_sorted_by_id() {
        let (_dir, store) = store();
        for id in ["2301.00002", "2301.00001", "2301.00003"] {
            store
                .write_extraction(&ExtractionResult {
                    paper_id: id.into(),
                    schema_version: 1,
                    outcome: ExtractionOutcome::Refused,
                })
                .unwrap();
        }
        let ids: Vec<String> = store
            .list_extractions(1)
            .unwrap()
            .into_iter()
            .map(|r| r.paper_id)
            .collect();
        assert_eq!(ids, vec!["2301.00001", "2301.00002", "2301.00003"]);
    }

    #[test]
    fn overwrite_supersedes_without_duplicating() {
        let (_dir, store) = store();
        let refused = ExtractionResult {
            paper_id: "2301.00001".into(),
            schema_version: 1,
            outcome: ExtractionOutcome::Refused,
        };
        store.write_extraction(&refused).unwrap();
        let failed = ExtractionResult {
            paper_id: "2301.00001".into(),
            schema_version: 1,
            outcome: ExtractionOutcome::ValidationFailure {
                reason: "x".into(),
            },
        };
        store.write_extraction(&failed).unwrap();
        let all = store.list_extractions(1).unwrap();
        assert_eq!(all.len(), 1);
        assert!(matches!(
            all[0].outcome,
            ExtractionOutcome::ValidationFailure { .. }
        ));
    }

    #[test]
    fn failed_download_ledger_round_trip() {
        let (_dir, store) = store();
        assert!(store.load_failed_downloads().is_empty());
        let mut failed = BTreeSet::new();
        failed.insert("2301.00009".to_string());
        store.save_failed_downloads(&failed).unwrap();
        assert_eq!(store.load_failed_downloads(), failed);
    }
}
