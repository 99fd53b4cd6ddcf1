//! Model backend trait and request construction.
//!
//! A backend is the thin adapter over one multimodal model provider:
//! it receives a fully built [`ModelRequest`] and returns the raw
//! response text. Parsing and validation of that text happen in the
//! orchestrator via [`ExtractionSchema`](crate::schema::ExtractionSchema),
//! so adapters stay wire-level only.

pub mod excerpt;
pub mod gemini;
pub mod mock;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::ExtractionSchema;
use crate::taxonomy::Taxonomy;
use crate::{Config, ParsedPaper};

pub use excerpt::ExcerptPolicy;

#[derive(Error, Debug, Clone)]
pub enum ModelError {
    /// Server returned 429 (rate limited / out of quota).
    #[error("model rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },
    /// Network, auth or server trouble — worth retrying with backoff.
    #[error("model endpoint unavailable: {reason}")]
    Unavailable { reason: String },
    /// The model declined to answer (safety block, empty candidates).
    #[error("model refused the request: {0}")]
    Refused(String),
    /// The provider replied with something the adapter cannot read.
    #[error("malformed model reply: {0}")]
    Invalid(String),
}

/// What gets sent to the provider for one paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub system_prompt: String,
    /// Document excerpt (already bounded by the excerpt policy).
    pub document: String,
    /// Constrained-decoding schema for the response.
    pub response_schema: serde_json::Value,
}

/// A multimodal model provider adapter.
pub trait ModelBackend: Send + Sync {
    /// Provider name for logs and config selection (e.g. "gemini").
    fn name(&self) -> &str;

    fn invoke<'a>(
        &'a self,
        request: &'a ModelRequest,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>>;
}

/// Extraction targets named in the prompt: what leaderboard this run
/// is building.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionTargets {
    /// Dataset/benchmark names of interest.
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub metric_description: String,
}

/// Select the configured provider adapter.
pub fn backend_for(config: &Config) -> Result<Box<dyn ModelBackend>, String> {
    match config.provider.as_str() {
        "gemini" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| "gemini provider requires an API key".to_string())?;
            Ok(Box::new(gemini::GeminiBackend::new(
                config.model_name.clone(),
                api_key,
            )))
        }
        other => Err(format!("unknown model provider `{other}`")),
    }
}

/// Build the request for one paper: system prompt (targets + allowed
/// taxonomy categories + field instructions), bounded document excerpt,
/// and the schema contract.
pub fn build_request(
    paper: &ParsedPaper,
    abstract_text: Option<&str>,
    targets: &ExtractionTargets,
    taxonomy: &Taxonomy,
    schema: &ExtractionSchema,
    policy: &ExcerptPolicy,
) -> ModelRequest {
    let datasets = if targets.datasets.is_empty() {
        "any benchmark dataset".to_string()
    } else {
        targets.datasets.join(", ")
    };
    let categories = taxonomy
        .stage_names()
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ");

    let metric_line = if targets.metric_name.is_empty() {
        "the primary performance metric reported by the paper".to_string()
    } else if targets.metric_description.is_empty() {
        targets.metric_name.clone()
    } else {
        format!("{} ({})", targets.metric_name, targets.metric_description)
    };

    let system_prompt = format!(
        "You are an automated data extraction agent. Your goal is to extract \
state-of-the-art (SOTA) leaderboard data from a research paper.\n\
\n\
--- TARGETS ---\n\
DATASETS: {datasets}\n\
METRIC: {metric_line}\n\
\n\
--- ALLOWED CATEGORIES ---\n\
You must classify the method into exactly one of these categories, verbatim:\n\
{categories}\n\
\n\
--- INSTRUCTIONS ---\n\
1. method: prefer the acronym; if none exists, use the shortest distinct name.\n\
2. strategy: a specific 2-3 word description of the technique.\n\
3. metrics: the exact reported numeric values. \"85.5%\" means 0.855. \
Use null for values the paper does not report.\n\
4. evidence: you MUST provide direct, verbatim quotes from the paper \
supporting every extracted metric.\n\
5. dataset_mentioned: whether the paper explicitly evaluates on the \
target datasets.\n"
    );

    ModelRequest {
        system_prompt,
        document: excerpt::excerpt_document(paper, abstract_text, policy),
        response_schema: schema.response_schema(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParseStatus, Section};

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_toml_str(
            "[[node]]\nname = \"Data Augmentation\"\n\n[[node]]\nname = \"Invariant Learning\"\n",
        )
        .unwrap()
    }

    fn paper() -> ParsedPaper {
        ParsedPaper {
            paper_id: "2301.00001".into(),
            status: ParseStatus::Ok,
            failure_reason: None,
            sections: vec![Section {
                title: "1 Introduction".into(),
                content: "We propose a method.".into(),
                order: 0,
            }],
            captions: Vec::new(),
            full_text: "We propose a method.".into(),
            page_count: 1,
            pages_failed: 0,
        }
    }

    #[test]
    fn prompt_names_targets_and_categories() {
        let targets = ExtractionTargets {
            datasets: vec!["Waterbirds".into()],
            metric_name: "worst-group accuracy".into(),
            metric_description: "accuracy on the worst-performing group".into(),
        };
        let request = build_request(
            &paper(),
            None,
            &targets,
            &taxonomy(),
            &ExtractionSchema::default(),
            &ExcerptPolicy::default(),
        );
        assert!(request.system_prompt.contains("Waterbirds"));
        assert!(request.system_prompt.contains("worst-group accuracy"));
        assert!(request.system_prompt.contains("'Data Augmentation'"));
        assert!(request.system_prompt.contains("'Invariant Learning'"));
    }

    #[test]
    fn backend_for_rejects_unknown_provider() {
        let config = Config {
            provider: "acme".into(),
            ..Config::default()
        };
        assert!(backend_for(&config).is_err());
    }

    #[test]
    fn backend_for_gemini_requires_key() {
        let config = Config {
            provider: "gemini".into(),
            api_key: None,
            ..Config::default()
        };
        assert!(backend_for(&config).is_err());

        let config = Config {
            provider: "gemini".into(),
            api_key: Some("k".into()),
            ..Config::default()
        };
        assert_eq!(backend_for(&config).unwrap().name(), "gemini");
    }
}
