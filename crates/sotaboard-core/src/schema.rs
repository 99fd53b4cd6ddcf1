//! The extraction contract and response validation.
//!
//! The model is asked for JSON conforming to [`ExtractionSchema`]; its
//! reply is then re-checked field by field here. Validation is an
//! explicit parser over `serde_json::Value` rather than a blanket
//! `Deserialize` so that every failure carries a reason precise enough
//! to feed back into a repair re-prompt.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::taxonomy::Taxonomy;
use crate::{MetricReading, SotaRecord};

/// Version of the record shape below. Bumping it invalidates cached
/// extraction results, which live under a per-version directory.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("response is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has the wrong type (expected {expected})")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("unknown taxonomy category `{0}`")]
    UnknownCategory(String),
    #[error("metric `{name}` has unusable value `{raw}`")]
    BadMetricValue { name: String, raw: String },
    #[error("metrics reported without any supporting evidence quote")]
    NoEvidence,
}

/// The versioned contract handed to the model alongside the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub version: u32,
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl ExtractionSchema {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// The response schema in the constrained-decoding dialect the model
    /// endpoint understands (uppercase type tags).
    pub fn response_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "OBJECT",
            "properties": {
                "paper_title": {
                    "type": "STRING",
                    "description": "Title of the research paper."
                },
                "method": {
                    "type": "STRING",
                    "description": "Name of the proposed method; prefer the acronym."
                },
                "category": {
                    "type": "STRING",
                    "description": "One of the allowed taxonomy categories, verbatim."
                },
                "strategy": {
                    "type": "STRING",
                    "description": "Specific 2-3 word description of the technique."
                },
                "metrics": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "name": { "type": "STRING" },
                            "value": {
                                "type": "STRING",
                                "description": "Exact reported value; null if not reported."
                            },
                            "unit": { "type": "STRING" },
                            "split": { "type": "STRING" }
                        },
                        "required": ["name", "value"]
                    }
                },
                "benchmarks": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "Benchmark/dataset names the method is evaluated on."
                },
                "dataset_mentioned": {
                    "type": "BOOLEAN",
                    "description": "Whether the target dataset is explicitly tested."
                },
                "evidence": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "Verbatim quotes supporting every extracted metric."
                }
            },
            "required": [
                "paper_title", "method", "category", "strategy", "dataset_mentioned"
            ]
        })
    }

    /// Parse and validate a raw model response into a [`SotaRecord`].
    pub fn validate(&self, raw: &str, taxonomy: &Taxonomy) -> Result<SotaRecord, ValidationError> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| ValidationError::MalformedJson(e.to_string()))?;
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let paper_title = required_string(obj, "paper_title")?;
        let method = required_string(obj, "method")?;
        let strategy = required_string(obj, "strategy")?;

        let category_raw = required_string(obj, "category")?;
        let category = taxonomy
            .resolve(&category_raw)
            .ok_or_else(|| ValidationError::UnknownCategory(category_raw.clone()))?
            .to_string();

        let dataset_mentioned = obj
            .get("dataset_mentioned")
            .ok_or(ValidationError::MissingField("dataset_mentioned"))?
            .as_bool()
            .ok_or(ValidationError::WrongType {
                field: "dataset_mentioned",
                expected: "boolean",
            })?;

        let metrics = parse_metrics(obj)?;
        let benchmarks = optional_string_array(obj, "benchmarks")?;
        let evidence = optional_string_array(obj, "evidence")?;

        // Leaderboard rows must trace back to evidence.
        if !metrics.is_empty() && evidence.is_empty() {
            return Err(ValidationError::NoEvidence);
        }

        Ok(SotaRecord {
            paper_title,
            method,
            category,
            strategy,
            metrics,
            benchmarks,
            dataset_mentioned,
            evidence,
        })
    }
}

fn required_string(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    let value = obj.get(field).ok_or(ValidationError::MissingField(field))?;
    let s = value.as_str().ok_or(ValidationError::WrongType {
        field,
        expected: "string",
    })?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Accepts either an array of strings or a single string (models
/// occasionally collapse one-element arrays).
fn optional_string_array(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<Vec<String>, ValidationError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![trimmed.to_string()])
            }
        }
        Some(serde_json::Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or(ValidationError::WrongType {
                    field,
                    expected: "array of strings",
                })?;
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
            Ok(out)
        }
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "array of strings",
        }),
    }
}

fn parse_metrics(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<MetricReading>, ValidationError> {
    let items = match obj.get("metrics") {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "metrics",
                expected: "array",
            });
        }
    };

    let mut readings = Vec::with_capacity(items.len());
    for item in items {
        let entry = item.as_object().ok_or(ValidationError::WrongType {
            field: "metrics",
            expected: "array of objects",
        })?;
        let name = required_string(entry, "name")?;
        let unit = match entry.get("unit") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => v.as_str().map(|s| s.trim().to_string()),
        };
        let split = match entry.get("split") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => v.as_str().map(|s| s.trim().to_string()),
        };

        // A null value means "not reported"; the reading is dropped
        // rather than failing the record.
        let Some(raw) = entry.get("value") else {
            continue;
        };
        match normalize_metric_value(raw, unit.as_deref()) {
            NormalizedValue::Value(value) => readings.push(MetricReading {
                name,
                value,
                unit,
                split,
            }),
            NormalizedValue::NotReported => continue,
            NormalizedValue::Unusable(raw) => {
                return Err(ValidationError::BadMetricValue { name, raw });
            }
        }
    }
    Ok(readings)
}

enum NormalizedValue {
    Value(f64),
    NotReported,
    Unusable(String),
}

fn is_percent_unit(unit: Option<&str>) -> bool {
    matches!(
        unit.map(|u| u.trim().to_lowercase()).as_deref(),
        Some("%") | Some("percent") | Some("percentage")
    )
}

/// Normalize a reported metric value.
///
/// String values may carry a trailing `%`; percent-context values above
/// 1 are scaled to a fraction ("85.5%" -> 0.855). Values without
/// percent context pass through untouched so non-percent metrics (FID,
/// perplexity, ...) survive. Negative values and unparseable strings
/// are unusable.
fn normalize_metric_value(raw: &serde_json::Value, unit: Option<&str>) -> NormalizedValue {
    let (parsed, saw_percent) = match raw {
        serde_json::Value::Null => return NormalizedValue::NotReported,
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(v) => (v, false),
            None => return NormalizedValue::Unusable(n.to_string()),
        },
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                return NormalizedValue::NotReported;
            }
            let saw_percent = trimmed.ends_with('%');
            let numeric = trimmed.trim_end_matches('%').trim();
            // Keep only the leading number if the model tacked on prose.
            let numeric = numeric.split_whitespace().next().unwrap_or("");
            match numeric.parse::<f64>() {
                Ok(v) => (v, saw_percent),
                Err(_) => return NormalizedValue::Unusable(trimmed.to_string()),
            }
        }
        other => return NormalizedValue::Unusable(other.to_string()),
    };

    if !parsed.is_finite() || parsed < 0.0 {
        return NormalizedValue::Unusable(parsed.to_string());
    }

    let percent_context = saw_percent || is_percent_unit(unit);
    if percent_context && parsed > 1.0 {
        NormalizedValue::Value(parsed / 100.0)
    } else {
        NormalizedValue::Value(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_toml_str(
            r#"
[[node]]
name = "Data Augmentation"
aliases = ["augmentation"]

[[node]]
name = "Invariant Learning"
"#,
        )
        .unwrap()
    }

    fn valid_response() -> String {
        serde_json::json!({
            "paper_title": "Robust Learning Under Shift",
            "method": "RLS",
            "category": "Invariant Learning",
            "strategy": "Invariant Risk Minimization",
            "metrics": [
                {"name": "worst-group accuracy", "value": "85.5%", "split": "test"}
            ],
            "benchmarks": ["Waterbirds"],
            "dataset_mentioned": true,
            "evidence": ["RLS achieves 85.5% worst-group accuracy on Waterbirds."]
        })
        .to_string()
    }

    #[test]
    fn valid_response_parses() {
        let schema = ExtractionSchema::default();
        let record = schema.validate(&valid_response(), &taxonomy()).unwrap();
        assert_eq!(record.method, "RLS");
        assert_eq!(record.metrics.len(), 1);
        assert!((record.metrics[0].value - 0.855).abs() < 1e-9);
        assert_eq!(record.benchmarks, vec!["Waterbirds"]);
    }

    #[test]
    fn missing_required_field_fails() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value.as_object_mut().unwrap().remove("method");
        let err = schema
            .validate(&value.to_string(), &taxonomy())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("method"));
    }

    #[test]
    fn unknown_category_fails() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value["category"] = "Distillation".into();
        let err = schema
            .validate(&value.to_string(), &taxonomy())
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownCategory("Distillation".into()));
    }

    #[test]
    fn category_alias_resolves_to_canonical() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value["category"] = "augmentation".into();
        let record = schema.validate(&value.to_string(), &taxonomy()).unwrap();
        assert_eq!(record.category, "Data Augmentation");
    }

    #[test]
    fn metrics_without_evidence_fail() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value["evidence"] = serde_json::json!([]);
        let err = schema
            .validate(&value.to_string(), &taxonomy())
            .unwrap_err();
        assert_eq!(err, ValidationError::NoEvidence);
    }

    #[test]
    fn null_metric_value_is_dropped() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value["metrics"] = serde_json::json!([
            {"name": "accuracy", "value": null}
        ]);
        value["evidence"] = serde_json::json!([]);
        let record = schema.validate(&value.to_string(), &taxonomy()).unwrap();
        assert!(record.metrics.is_empty());
    }

    #[test]
    fn garbage_metric_value_fails() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value["metrics"] = serde_json::json!([
            {"name": "accuracy", "value": "best in class"}
        ]);
        let err = schema
            .validate(&value.to_string(), &taxonomy())
            .unwrap_err();
        assert!(matches!(err, ValidationError::BadMetricValue { .. }));
    }

    #[test]
    fn malformed_json_fails_not_panics() {
        let schema = ExtractionSchema::default();
        let err = schema.validate("not json {", &taxonomy()).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedJson(_)));
    }

    #[test]
    fn single_string_evidence_accepted() {
        let schema = ExtractionSchema::default();
        let mut value: serde_json::Value = serde_json::from_str(&valid_response()).unwrap();
        value["evidence"] = "RLS achieves 85.5%.".into();
        let record = schema.validate(&value.to_string(), &taxonomy()).unwrap();
        assert_eq!(record.evidence.len(), 1);
    }

    #[test]
    fn percent_normalization_rules() {
        // String with % above 1 scales down.
        let v = normalize_metric_value(&serde_json::json!("85.5%"), None);
        assert!(matches!(v, NormalizedValue::Value(x) if (x - 0.855).abs() < 1e-9));
        // Percent unit with bare number above 1 scales down.
        let v = normalize_metric_value(&serde_json::json!(91.2), Some("percent"));
        assert!(matches!(v, NormalizedValue::Value(x) if (x - 0.912).abs() < 1e-9));
        // No percent context: large values pass through (e.g. FID).
        let v = normalize_metric_value(&serde_json::json!(23.4), None);
        assert!(matches!(v, NormalizedValue::Value(x) if (x - 23.4).abs() < 1e-9));
        // Fractions stay fractions.
        let v = normalize_metric_value(&serde_json::json!("0.855"), None);
        assert!(matches!(v, NormalizedValue::Value(x) if (x - 0.855).abs() < 1e-9));
        // Negative values are unusable.
        let v = normalize_metric_value(&serde_json::json!(-1.0), None);
        assert!(matches!(v, NormalizedValue::Unusable(_)));
    }
}
