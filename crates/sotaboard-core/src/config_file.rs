//! On-disk TOML run configuration.
//!
//! All fields are optional so partial configs work: the platform config
//! (`<config_dir>/sotaboard/config.toml`) is overlaid by a CWD
//! `.sotaboard.toml`, and defaults fill whatever is left at use sites.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::content::ContentRules;
use crate::metadata::FilterCriteria;
use crate::model::{ExcerptPolicy, ExtractionTargets};
use crate::rate_limit::AdaptiveLimiter;
use crate::schema::{CURRENT_SCHEMA_VERSION, ExtractionSchema};
use crate::Config;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub filter: Option<FilterConfig>,
    pub content: Option<ContentConfig>,
    pub fetch: Option<FetchConfig>,
    pub extraction: Option<ExtractionConfig>,
    pub paths: Option<PathsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    pub keyword_groups: Option<Vec<Vec<String>>>,
    pub allowed_categories: Option<Vec<String>>,
    /// ISO dates ("2023-01-01"); unparseable values are ignored.
    pub min_date: Option<String>,
    pub max_date: Option<String>,
    pub require_doi: Option<bool>,
    pub exclude_title_keywords: Option<Vec<String>>,
    pub max_scan: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    pub keywords: Option<Vec<String>>,
    pub min_text_len: Option<usize>,
    pub section_keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: Option<String>,
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    /// Pacing between fresh downloads.
    pub delay_ms: Option<u64>,
    /// Retry ids recorded in the failed-download ledger.
    pub refetch_failed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub provider: Option<String>,
    pub model_name: Option<String>,
    pub api_key: Option<String>,
    pub schema_version: Option<u32>,
    pub call_budget: Option<usize>,
    pub num_workers: Option<usize>,
    pub call_timeout_secs: Option<u64>,
    pub max_unavailable_retries: Option<u32>,
    pub inter_call_delay_ms: Option<u64>,
    pub datasets: Option<Vec<String>>,
    pub metric_name: Option<String>,
    pub metric_description: Option<String>,
    pub excerpt_max_chars: Option<usize>,
    pub excerpt_priority_keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub store_root: Option<String>,
    pub snapshot: Option<String>,
    pub taxonomy: Option<String>,
}

/// Platform config path: `<config_dir>/sotaboard/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sotaboard").join("config.toml"))
}

/// Load config by cascading CWD `.sotaboard.toml` over platform config.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".sotaboard.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. `None` if the file is missing
/// or unparseable.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn merge_section<T>(base: Option<T>, overlay: Option<T>, combine: impl Fn(T, T) -> T) -> Option<T> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (Some(b), Some(o)) => Some(combine(b, o)),
    }
}

/// Merge two configs: `overlay` values take precedence over `base`,
/// field by field.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        filter: merge_section(base.filter, overlay.filter, |b, o| FilterConfig {
            keyword_groups: o.keyword_groups.or(b.keyword_groups),
            allowed_categories: o.allowed_categories.or(b.allowed_categories),
            min_date: o.min_date.or(b.min_date),
            max_date: o.max_date.or(b.max_date),
            require_doi: o.require_doi.or(b.require_doi),
            exclude_title_keywords: o.exclude_title_keywords.or(b.exclude_title_keywords),
            max_scan: o.max_scan.or(b.max_scan),
        }),
        content: merge_section(base.content, overlay.content, |b, o| ContentConfig {
            keywords: o.keywords.or(b.keywords),
            min_text_len: o.min_text_len.or(b.min_text_len),
            section_keywords: o.section_keywords.or(b.section_keywords),
        }),
        fetch: merge_section(base.fetch, overlay.fetch, |b, o| FetchConfig {
            base_url: o.base_url.or(b.base_url),
            max_retries: o.max_retries.or(b.max_retries),
            timeout_secs: o.timeout_secs.or(b.timeout_secs),
            delay_ms: o.delay_ms.or(b.delay_ms),
            refetch_failed: o.refetch_failed.or(b.refetch_failed),
        }),
        extraction: merge_section(base.extraction, overlay.extraction, |b, o| {
            ExtractionConfig {
                provider: o.provider.or(b.provider),
                model_name: o.model_name.or(b.model_name),
                api_key: o.api_key.or(b.api_key),
                schema_version: o.schema_version.or(b.schema_version),
                call_budget: o.call_budget.or(b.call_budget),
                num_workers: o.num_workers.or(b.num_workers),
                call_timeout_secs: o.call_timeout_secs.or(b.call_timeout_secs),
                max_unavailable_retries: o.max_unavailable_retries.or(b.max_unavailable_retries),
                inter_call_delay_ms: o.inter_call_delay_ms.or(b.inter_call_delay_ms),
                datasets: o.datasets.or(b.datasets),
                metric_name: o.metric_name.or(b.metric_name),
                metric_description: o.metric_description.or(b.metric_description),
                excerpt_max_chars: o.excerpt_max_chars.or(b.excerpt_max_chars),
                excerpt_priority_keywords: o
                    .excerpt_priority_keywords
                    .or(b.excerpt_priority_keywords),
            }
        }),
        paths: merge_section(base.paths, overlay.paths, |b, o| PathsConfig {
            store_root: o.store_root.or(b.store_root),
            snapshot: o.snapshot.or(b.snapshot),
            taxonomy: o.taxonomy.or(b.taxonomy),
        }),
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let raw = value?;
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::warn!(raw, error = %e, "ignoring unparseable config date");
            None
        }
    }
}

impl FilterConfig {
    pub fn criteria(&self) -> FilterCriteria {
        FilterCriteria {
            keyword_groups: self.keyword_groups.clone().unwrap_or_default(),
            allowed_categories: self.allowed_categories.clone().unwrap_or_default(),
            min_date: parse_date(self.min_date.as_deref()),
            max_date: parse_date(self.max_date.as_deref()),
            require_doi: self.require_doi.unwrap_or(false),
            exclude_title_keywords: self.exclude_title_keywords.clone().unwrap_or_default(),
            max_scan: self.max_scan,
        }
    }
}

impl ContentConfig {
    pub fn rules(&self) -> ContentRules {
        ContentRules {
            keywords: self.keywords.clone().unwrap_or_default(),
            min_text_len: self.min_text_len.unwrap_or(0),
            section_keywords: self.section_keywords.clone().unwrap_or_default(),
        }
    }
}

impl ExtractionConfig {
    /// Orchestrator config with defaults applied. The API key falls
    /// back to the `GEMINI_API_KEY` environment variable.
    pub fn orchestrator_config(&self) -> Config {
        let defaults = Config::default();
        let inter_call_delay = self
            .inter_call_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.inter_call_delay);
        Config {
            api_key: self
                .api_key
                .clone()
                .or_else(|| std::env::var("GEMINI_API_KEY").ok()),
            model_name: self.model_name.clone().unwrap_or(defaults.model_name),
            provider: self.provider.clone().unwrap_or(defaults.provider),
            num_workers: self.num_workers.unwrap_or(defaults.num_workers),
            call_timeout_secs: self.call_timeout_secs.unwrap_or(defaults.call_timeout_secs),
            call_budget: self.call_budget,
            max_unavailable_retries: self
                .max_unavailable_retries
                .unwrap_or(defaults.max_unavailable_retries),
            inter_call_delay,
            force_refresh: false,
            limiter: Arc::new(AdaptiveLimiter::new(inter_call_delay)),
        }
    }

    pub fn schema(&self) -> ExtractionSchema {
        ExtractionSchema::new(self.schema_version.unwrap_or(CURRENT_SCHEMA_VERSION))
    }

    pub fn targets(&self) -> ExtractionTargets {
        ExtractionTargets {
            datasets: self.datasets.clone().unwrap_or_default(),
            metric_name: self.metric_name.clone().unwrap_or_default(),
            metric_description: self.metric_description.clone().unwrap_or_default(),
        }
    }

    pub fn excerpt_policy(&self) -> ExcerptPolicy {
        let defaults = ExcerptPolicy::default();
        ExcerptPolicy {
            max_chars: self.excerpt_max_chars.unwrap_or(defaults.max_chars),
            priority_keywords: self
                .excerpt_priority_keywords
                .clone()
                .unwrap_or(defaults.priority_keywords),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_toml() {
        let config = ConfigFile {
            filter: Some(FilterConfig {
                keyword_groups: Some(vec![vec!["spurious correlation".into()]]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.filter.unwrap().keyword_groups.unwrap(),
            vec![vec!["spurious correlation".to_string()]]
        );
    }

    #[test]
    fn merge_overlay_wins_per_field() {
        let base = ConfigFile {
            extraction: Some(ExtractionConfig {
                model_name: Some("base-model".into()),
                call_budget: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            extraction: Some(ExtractionConfig {
                model_name: Some("overlay-model".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let extraction = merged.extraction.unwrap();
        assert_eq!(extraction.model_name.as_deref(), Some("overlay-model"));
        // Base value survives when the overlay leaves it unset.
        assert_eq!(extraction.call_budget, Some(10));
    }

    #[test]
    fn merge_keeps_base_section_when_overlay_absent() {
        let base = ConfigFile {
            content: Some(ContentConfig {
                min_text_len: Some(1000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.content.unwrap().min_text_len, Some(1000));
    }

    #[test]
    fn criteria_parses_dates_leniently() {
        let filter = FilterConfig {
            min_date: Some("2023-01-01".into()),
            max_date: Some("not-a-date".into()),
            ..Default::default()
        };
        let criteria = filter.criteria();
        assert!(criteria.min_date.is_some());
        assert!(criteria.max_date.is_none());
    }

    #[test]
    fn schema_version_defaults_to_current() {
        let extraction = ExtractionConfig::default();
        assert_eq!(extraction.schema().version, CURRENT_SCHEMA_VERSION);
        let pinned = ExtractionConfig {
            schema_version: Some(7),
            ..Default::default()
        };
        assert_eq!(pinned.schema().version, 7);
    }
}
