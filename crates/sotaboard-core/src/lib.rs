use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config_file;
pub mod content;
pub mod metadata;
pub mod model;
pub mod orchestrator;
pub mod rate_limit;
pub mod schema;
pub mod store;
pub mod taxonomy;

// Re-export for convenience
pub use content::{ContentDecision, ContentRules};
pub use metadata::FilterCriteria;
pub use model::{ModelBackend, ModelError, ModelRequest};
pub use orchestrator::extract_candidates;
pub use rate_limit::AdaptiveLimiter;
pub use schema::{ExtractionSchema, ValidationError};
pub use store::{RunStore, StoreError};
pub use taxonomy::Taxonomy;

/// One paper's metadata as ingested from the bulk snapshot.
///
/// Immutable after ingestion — filters read it, nothing mutates it.
/// Unrecognized snapshot fields are preserved in `extra` so a record
/// round-trips through the candidate cache without loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// Whitespace-separated category list, as stored in the snapshot
    /// (e.g. `"cs.LG stat.ML"`).
    #[serde(default)]
    pub categories: String,
    #[serde(default)]
    pub doi: Option<String>,
    /// ISO date of the last metadata update (e.g. `"2023-01-12"`).
    #[serde(default)]
    pub update_date: Option<String>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PaperRecord {
    /// Iterate the paper's categories as individual tags.
    pub fn category_tags(&self) -> impl Iterator<Item = &str> {
        self.categories.split_whitespace()
    }
}

/// Overall outcome of parsing a single PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// Every page extracted.
    Ok,
    /// One or more pages failed to extract; their content is empty.
    Partial,
    /// The document was unreadable; the paper is excluded downstream.
    Failed,
}

/// A contiguous titled chunk of paper text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub order: usize,
}

/// Normalized document representation of one paper, cached on disk
/// keyed by paper id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPaper {
    pub paper_id: String,
    pub status: ParseStatus,
    /// Present only when `status` is [`ParseStatus::Failed`].
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Figure/table caption lines collected best-effort.
    #[serde(default)]
    pub captions: Vec<String>,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub page_count: usize,
    #[serde(default)]
    pub pages_failed: usize,
}

impl ParsedPaper {
    /// An empty document marking a total parse failure.
    pub fn failed(paper_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            status: ParseStatus::Failed,
            failure_reason: Some(reason.into()),
            sections: Vec::new(),
            captions: Vec::new(),
            full_text: String::new(),
            page_count: 0,
            pages_failed: 0,
        }
    }

    /// The paper's abstract section, if segmentation found one.
    pub fn abstract_section(&self) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case("abstract"))
    }
}

/// A single extracted performance measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    /// Evaluation split the number was reported on (e.g. "test").
    #[serde(default)]
    pub split: Option<String>,
}

/// The validated structured record extracted from one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SotaRecord {
    pub paper_title: String,
    pub method: String,
    /// Resolved taxonomy category (canonical node name).
    pub category: String,
    pub strategy: String,
    #[serde(default)]
    pub metrics: Vec<MetricReading>,
    #[serde(default)]
    pub benchmarks: Vec<String>,
    pub dataset_mentioned: bool,
    /// Verbatim supporting quotes; non-empty whenever `metrics` is.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Terminal state of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Success(SotaRecord),
    ValidationFailure { reason: String },
    Refused,
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }
}

/// Persisted result for one (paper id, schema version) pair.
///
/// Exactly one exists per pair under normal operation; a re-run with
/// forced refresh overwrites atomically, it never duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub paper_id: String,
    pub schema_version: u32,
    pub outcome: ExtractionOutcome,
}

/// Progress events emitted during the extraction phase.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Extracting {
        index: usize,
        total: usize,
        paper_id: String,
    },
    /// A valid cached result exists; no model call made.
    CacheHit {
        index: usize,
        total: usize,
        paper_id: String,
    },
    /// The model endpoint was unavailable; backing off before retrying.
    ModelRetry {
        paper_id: String,
        attempt: u32,
        backoff: Duration,
    },
    /// Validation failed once; re-prompting with the error appended.
    RepairRetry { paper_id: String, reason: String },
    Result {
        index: usize,
        total: usize,
        result: Box<ExtractionResult>,
    },
    /// The call budget ran out; remaining papers stay eligible.
    BudgetExhausted { paper_id: String },
    /// Model retries exhausted — no further calls this run.
    Halted { reason: String },
}

/// Summary counters for a complete extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub cache_hits: usize,
    pub validation_failures: usize,
    pub refusals: usize,
    pub budget_skipped: usize,
    /// Papers left untouched because the run halted early.
    pub unprocessed: usize,
    pub model_calls: usize,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open document: {0}")]
    Open(String),
    #[error("text extraction failed: {0}")]
    Extraction(String),
}

/// Page-level text extraction from a PDF.
///
/// Implementations live in leaf crates so heavy native dependencies
/// stay out of the core. A page that fails to extract is reported as
/// `None` rather than failing the whole document; only an unreadable
/// document returns `Err`.
pub trait PdfBackend: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Option<String>>, BackendError>;
}

/// Configuration for the extraction orchestrator.
#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub model_name: String,
    pub provider: String,
    pub num_workers: usize,
    pub call_timeout_secs: u64,
    /// Max model calls this run; `None` means unlimited.
    pub call_budget: Option<usize>,
    pub max_unavailable_retries: u32,
    /// Minimum spacing between model calls.
    pub inter_call_delay: Duration,
    /// Re-extract even when a cached result exists.
    pub force_refresh: bool,
    pub limiter: Arc<AdaptiveLimiter>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model_name", &self.model_name)
            .field("provider", &self.provider)
            .field("num_workers", &self.num_workers)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .field("call_budget", &self.call_budget)
            .field("max_unavailable_retries", &self.max_unavailable_retries)
            .field("inter_call_delay", &self.inter_call_delay)
            .field("force_refresh", &self.force_refresh)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let inter_call_delay = Duration::from_millis(500);
        Self {
            api_key: None,
            model_name: "gemini-2.5-flash".to_string(),
            provider: "gemini".to_string(),
            num_workers: 2,
            call_timeout_secs: 120,
            call_budget: None,
            max_unavailable_retries: 3,
            inter_call_delay,
            force_refresh: false,
            limiter: Arc::new(AdaptiveLimiter::new(inter_call_delay)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_record_categories_split() {
        let record: PaperRecord = serde_json::from_str(
            r#"{"id":"2301.00001","title":"T","abstract":"A","categories":"cs.LG stat.ML"}"#,
        )
        .unwrap();
        let tags: Vec<&str> = record.category_tags().collect();
        assert_eq!(tags, vec!["cs.LG", "stat.ML"]);
    }

    #[test]
    fn paper_record_preserves_unknown_fields() {
        let record: PaperRecord = serde_json::from_str(
            r#"{"id":"2301.00001","title":"T","abstract":"A","categories":"cs.LG","authors":"A. Author"}"#,
        )
        .unwrap();
        assert_eq!(
            record.extra.get("authors").and_then(|v| v.as_str()),
            Some("A. Author")
        );
    }

    #[test]
    fn extraction_outcome_round_trips_tagged() {
        let outcome = ExtractionOutcome::ValidationFailure {
            reason: "missing field `method`".into(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("validation_failure"));
        let back: ExtractionOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn config_debug_masks_api_key() {
        let config = Config {
            api_key: Some("secret".into()),
            ..Config::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }
}
