//! Gemini adapter over the Generative Language REST API.
//!
//! Requests use JSON response mode with the extraction schema attached
//! as `responseSchema` and temperature 0, so the reply is a single JSON
//! document matching the contract (modulo model error — which is what
//! validation is for).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{ModelBackend, ModelError, ModelRequest};
use crate::rate_limit::parse_retry_after;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the model declined rather than answered.
const REFUSAL_FINISH_REASONS: &[&str] =
    &["SAFETY", "PROHIBITED_CONTENT", "RECITATION", "BLOCKLIST"];

pub struct GeminiBackend {
    model_name: String,
    api_key: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(model_name: String, api_key: String) -> Self {
        Self {
            model_name,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the endpoint base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn invoke<'a>(
        &'a self,
        request: &'a ModelRequest,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}/models/{}:generateContent",
                self.base_url, self.model_name
            );
            let body = serde_json::json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "text": request.document }]
                }],
                "systemInstruction": {
                    "parts": [{ "text": request.system_prompt }]
                },
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": request.response_schema,
                    "temperature": 0.0
                }
            });

            let resp = client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| ModelError::Unavailable {
                    reason: e.to_string(),
                })?;

            let status = resp.status();
            if status.as_u16() == 429 {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                return Err(ModelError::RateLimited { retry_after });
            }
            if status.is_server_error()
                || status.as_u16() == 401
                || status.as_u16() == 403
            {
                return Err(ModelError::Unavailable {
                    reason: format!("HTTP {status}"),
                });
            }
            if !status.is_success() {
                return Err(ModelError::Invalid(format!("HTTP {status}")));
            }

            let value: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| ModelError::Invalid(e.to_string()))?;
            parse_generate_response(&value)
        })
    }
}

/// Pull the response text out of a `generateContent` reply, mapping
/// safety blocks and empty candidate lists to [`ModelError::Refused`].
fn parse_generate_response(value: &serde_json::Value) -> Result<String, ModelError> {
    if let Some(reason) = value
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(|r| r.as_str())
    {
        return Err(ModelError::Refused(format!("prompt blocked: {reason}")));
    }

    let candidates = value
        .get("candidates")
        .and_then(|c| c.as_array())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ModelError::Refused("no candidates returned".to_string()))?;

    let candidate = &candidates[0];
    if let Some(reason) = candidate.get("finishReason").and_then(|r| r.as_str())
        && REFUSAL_FINISH_REASONS.contains(&reason)
    {
        return Err(ModelError::Refused(format!("finish reason: {reason}")));
    }

    let mut text = String::new();
    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(chunk) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(chunk);
            }
        }
    }

    if text.trim().is_empty() {
        return Err(ModelError::Invalid("empty response text".to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_candidate_parts() {
        let value = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] },
                "finishReason": "STOP"
            }]
        });
        assert_eq!(parse_generate_response(&value).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn safety_finish_reason_is_refusal() {
        let value = serde_json::json!({
            "candidates": [{
                "content": { "parts": [] },
                "finishReason": "SAFETY"
            }]
        });
        assert!(matches!(
            parse_generate_response(&value),
            Err(ModelError::Refused(_))
        ));
    }

    #[test]
    fn prompt_block_is_refusal() {
        let value = serde_json::json!({
            "promptFeedback": { "blockReason": "OTHER" }
        });
        assert!(matches!(
            parse_generate_response(&value),
            Err(ModelError::Refused(_))
        ));
    }

    #[test]
    fn missing_candidates_is_refusal() {
        let value = serde_json::json!({ "candidates": [] });
        assert!(matches!(
            parse_generate_response(&value),
            Err(ModelError::Refused(_))
        ));
    }

    #[test]
    fn empty_text_is_invalid() {
        let value = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "  " }] } }]
        });
        assert!(matches!(
            parse_generate_response(&value),
            Err(ModelError::Invalid(_))
        ));
    }
}
