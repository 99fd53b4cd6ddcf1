//! Bounded document excerpting for model input.
//!
//! When a paper exceeds the input budget, sections are admitted in
//! priority order: result-bearing sections first (titles matching the
//! configured keywords), then the abstract, then the remaining sections
//! in document order. Reference lists, appendices and similar
//! boilerplate never reach the model.

use serde::{Deserialize, Serialize};

use crate::{ParsedPaper, Section};

/// Section titles excluded from model input (substring match,
/// lowercase).
const EXCLUDED_SECTIONS: &[&str] = &[
    "references",
    "bibliography",
    "appendix",
    "supplementary",
    "acknowledgments",
    "acknowledgements",
    "author contributions",
    "funding",
    "ethics statement",
    "checklist",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcerptPolicy {
    /// Input budget in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Section-title keywords admitted first.
    #[serde(default = "default_priority_keywords")]
    pub priority_keywords: Vec<String>,
}

fn default_max_chars() -> usize {
    50_000
}

fn default_priority_keywords() -> Vec<String> {
    ["result", "experiment", "evaluation", "benchmark"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ExcerptPolicy {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            priority_keywords: default_priority_keywords(),
        }
    }
}

fn is_excluded(title: &str) -> bool {
    let lower = title.to_lowercase();
    EXCLUDED_SECTIONS.iter().any(|ex| lower.contains(ex))
}

fn is_priority(title: &str, policy: &ExcerptPolicy) -> bool {
    let lower = title.to_lowercase();
    policy
        .priority_keywords
        .iter()
        .any(|kw| lower.contains(&kw.to_lowercase()))
}

/// Truncate at a char boundary at or below `budget` bytes.
fn truncate_to_boundary(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let mut end = budget;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Assemble the bounded model input for one paper.
///
/// `abstract_text` is the snapshot abstract, preferred over any
/// abstract section the parser segmented (the snapshot copy is clean
/// of PDF extraction artifacts).
pub fn excerpt_document(
    paper: &ParsedPaper,
    abstract_text: Option<&str>,
    policy: &ExcerptPolicy,
) -> String {
    let mut parts: Vec<(String, &str)> = Vec::new();

    let kept: Vec<&Section> = paper
        .sections
        .iter()
        .filter(|s| !is_excluded(&s.title))
        .collect();

    let abstract_from_sections = paper.abstract_section().map(|s| s.content.as_str());
    let abstract_body = abstract_text.or(abstract_from_sections);

    // Priority sections, then abstract, then the rest in order.
    for section in kept.iter().filter(|s| is_priority(&s.title, policy)) {
        parts.push((section.title.clone(), section.content.as_str()));
    }
    if let Some(body) = abstract_body {
        parts.push(("Abstract".to_string(), body));
    }
    for section in kept.iter().filter(|s| {
        !is_priority(&s.title, policy) && !s.title.eq_ignore_ascii_case("abstract")
    }) {
        parts.push((section.title.clone(), section.content.as_str()));
    }

    // No segmentation? Fall back to raw full text.
    if parts.is_empty() {
        let mut out = truncate_to_boundary(&paper.full_text, policy.max_chars).to_string();
        if out.len() < paper.full_text.len() {
            out.push_str("\n\n[Text truncated...]");
        }
        return out;
    }

    let mut out = String::new();
    let mut truncated = false;
    for (title, content) in parts {
        if out.len() >= policy.max_chars {
            truncated = true;
            break;
        }
        let remaining = policy.max_chars - out.len();
        let chunk = format!("{title}\n{content}\n\n");
        if chunk.len() <= remaining {
            out.push_str(&chunk);
        } else {
            out.push_str(truncate_to_boundary(&chunk, remaining));
            truncated = true;
            break;
        }
    }

    if truncated {
        out.push_str("\n\n[Text truncated...]");
    }
    out
}
