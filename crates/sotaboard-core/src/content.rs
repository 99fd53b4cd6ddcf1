//! Content-level filtering over parsed papers.
//!
//! Metadata filtering is coarse; this second gate rejects papers
//! unlikely to contain extractable quantitative results before the
//! model stage. The matched keywords are kept in the decision so a
//! rejection (or inclusion) can be audited later.

use serde::{Deserialize, Serialize};

use crate::{ParseStatus, ParsedPaper};

/// Content-level inclusion rules. All configured checks must pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRules {
    /// At least one must appear in the full text (empty = no check).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Minimum extracted text length in characters (0 = no check).
    #[serde(default)]
    pub min_text_len: usize,
    /// At least one section title must contain one of these
    /// (empty = no check). Typical values: "results", "experiments".
    #[serde(default)]
    pub section_keywords: Vec<String>,
}

/// Per-paper decision with the evidence that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDecision {
    pub include: bool,
    pub matched_keywords: Vec<String>,
    /// Set when `include` is false.
    #[serde(default)]
    pub reason: Option<String>,
}

impl ContentDecision {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            include: false,
            matched_keywords: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

impl ContentRules {
    pub fn evaluate(&self, paper: &ParsedPaper) -> ContentDecision {
        if paper.status == ParseStatus::Failed {
            return ContentDecision::reject("document parse failed");
        }

        if self.min_text_len > 0 && paper.full_text.len() < self.min_text_len {
            return ContentDecision::reject(format!(
                "text too short ({} < {} chars)",
                paper.full_text.len(),
                self.min_text_len
            ));
        }

        if !self.section_keywords.is_empty() {
            let hit = paper.sections.iter().any(|s| {
                let title = s.title.to_lowercase();
                self.section_keywords
                    .iter()
                    .any(|kw| title.contains(&kw.to_lowercase()))
            });
            if !hit {
                return ContentDecision::reject("no result-bearing section found");
            }
        }

        let mut matched = Vec::new();
        if !self.keywords.is_empty() {
            let text = paper.full_text.to_lowercase();
            for kw in &self.keywords {
                if text.contains(&kw.to_lowercase()) {
                    matched.push(kw.clone());
                }
            }
            if matched.is_empty() {
                return ContentDecision::reject("no content keyword matched");
            }
        }

        ContentDecision {
            include: true,
            matched_keywords: matched,
            reason: None,
        }
    }
}
