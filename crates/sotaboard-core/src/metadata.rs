//! Metadata-level candidate selection over the bulk snapshot.
//!
//! This is the cheapest filter in the pipeline and runs before any
//! download or model call. It is a pure predicate: given the same
//! snapshot and criteria it always selects the same candidate set, and
//! re-filtering its own output is the identity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::PaperRecord;

/// Configurable boolean predicate over snapshot metadata.
///
/// A record is a candidate iff it matches at least one keyword in
/// *each* keyword group (matched case-insensitively as substrings of
/// title and abstract) and satisfies every other configured criterion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// AND of any-of groups over title + abstract.
    #[serde(default)]
    pub keyword_groups: Vec<Vec<String>>,
    /// Paper passes if its category set intersects this list. Empty
    /// means no category constraint.
    #[serde(default)]
    pub allowed_categories: Vec<String>,
    #[serde(default)]
    pub min_date: Option<NaiveDate>,
    #[serde(default)]
    pub max_date: Option<NaiveDate>,
    /// Keep only papers carrying a DOI (a proxy for "published").
    #[serde(default)]
    pub require_doi: bool,
    /// Drop papers whose title contains any of these terms (used to
    /// exclude surveys and reviews).
    #[serde(default)]
    pub exclude_title_keywords: Vec<String>,
    /// Stop after examining this many snapshot records.
    #[serde(default)]
    pub max_scan: Option<usize>,
}

impl FilterCriteria {
    /// Evaluate the predicate against a single record.
    pub fn matches(&self, record: &PaperRecord) -> bool {
        if !self.allowed_categories.is_empty() {
            let any = record.category_tags().any(|tag| {
                self.allowed_categories
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(tag))
            });
            if !any {
                return false;
            }
        }

        if self.min_date.is_some() || self.max_date.is_some() {
            // A missing or unparseable date fails a configured bound.
            let Some(date) = record
                .update_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                return false;
            };
            if let Some(min) = self.min_date
                && date < min
            {
                return false;
            }
            if let Some(max) = self.max_date
                && date > max
            {
                return false;
            }
        }

        if self.require_doi && record.doi.as_deref().map_or(true, |d| d.trim().is_empty()) {
            return false;
        }

        let title = record.title.to_lowercase();
        if self
            .exclude_title_keywords
            .iter()
            .any(|term| title.contains(&term.to_lowercase()))
        {
            return false;
        }

        if !self.keyword_groups.is_empty() {
            let haystack = format!("{} {}", title, record.abstract_text.to_lowercase());
            for group in &self.keyword_groups {
                if group.is_empty() {
                    continue;
                }
                if !group
                    .iter()
                    .any(|kw| haystack.contains(&kw.to_lowercase()))
                {
                    return false;
                }
            }
        }

        true
    }

    /// Scan a snapshot stream and collect the candidate set, preserving
    /// snapshot order. Honors `max_scan` as a bound on records examined
    /// (not on candidates found).
    pub fn filter_candidates<I>(&self, records: I) -> Vec<PaperRecord>
    where
        I: IntoIterator<Item = PaperRecord>,
    {
        let mut candidates = Vec::new();
        for (scanned, record) in records.into_iter().enumerate() {
            if let Some(cap) = self.max_scan
                && scanned >= cap
            {
                break;
            }
            if self.matches(&record) {
                candidates.push(record);
            }
        }
        tracing::info!(candidates = candidates.len(), "metadata scan complete");
        candidates
    }
}
