//! Leaderboard aggregation.
//!
//! A pure function of persisted extraction results: flatten successful
//! records into rows, drop exact duplicates, sort deterministically.
//! Running it twice on the same inputs yields byte-identical exports.

pub mod export;

use std::collections::HashSet;

use sotaboard_core::{ExtractionOutcome, ExtractionResult, SotaRecord};

pub use export::{ExportFormat, export_rows, write_leaderboard};

/// One leaderboard entry: a (method, benchmark, metric) triple with its
/// value and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub metric: String,
    pub value: f64,
    pub split: Option<String>,
    pub method: String,
    pub category: String,
    pub strategy: String,
    /// Empty when the record named no benchmark.
    pub benchmark: String,
    pub paper_id: String,
    pub paper_title: String,
    /// First supporting quote from the originating record.
    pub evidence: String,
}

fn rows_for_record(paper_id: &str, record: &SotaRecord) -> Vec<LeaderboardRow> {
    // Validation guarantees evidence is non-empty whenever metrics is.
    let evidence = record.evidence.first().cloned().unwrap_or_default();

    // One row per metric x benchmark; a record without benchmarks still
    // contributes its metrics under an empty benchmark name.
    let benchmarks: Vec<&str> = if record.benchmarks.is_empty() {
        vec![""]
    } else {
        record.benchmarks.iter().map(|b| b.as_str()).collect()
    };

    let mut rows = Vec::with_capacity(record.metrics.len() * benchmarks.len());
    for metric in &record.metrics {
        for benchmark in &benchmarks {
            rows.push(LeaderboardRow {
                metric: metric.name.clone(),
                value: metric.value,
                split: metric.split.clone(),
                method: record.method.clone(),
                category: record.category.clone(),
                strategy: record.strategy.clone(),
                benchmark: (*benchmark).to_string(),
                paper_id: paper_id.to_string(),
                paper_title: record.paper_title.clone(),
                evidence: evidence.clone(),
            });
        }
    }
    rows
}

/// Flatten all successful results into sorted, deduplicated rows.
pub fn build_leaderboard(results: &[ExtractionResult]) -> Vec<LeaderboardRow> {
    let mut rows = Vec::new();
    for result in results {
        if let ExtractionOutcome::Success(ref record) = result.outcome {
            rows.extend(rows_for_record(&result.paper_id, record));
        }
    }

    // Exact-duplicate rows collapse to one.
    let mut seen: HashSet<(String, String, String, u64, String)> = HashSet::new();
    rows.retain(|row| {
        seen.insert((
            row.method.clone(),
            row.benchmark.clone(),
            row.metric.clone(),
            row.value.to_bits(),
            row.paper_id.clone(),
        ))
    });

    rows.sort_by(|a, b| {
        a.metric
            .cmp(&b.metric)
            .then_with(|| a.benchmark.cmp(&b.benchmark))
            .then_with(|| b.value.total_cmp(&a.value))
            .then_with(|| a.method.cmp(&b.method))
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });
    rows
}
