// src/inference/huggingface.rs
//! HuggingFace Inference API provider (summarization, sentiment, zero-shot bias).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{InferenceError, InferenceRequest, Provider};
use crate::cache::anon_hash;
use crate::config::InferenceSettings;

const BODY_SNIPPET: usize = 300;

pub struct HuggingFaceProvider {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    summarize_model: String,
    sentiment_model: String,
    bias_model: String,
}

impl HuggingFaceProvider {
    pub fn new(settings: &InferenceSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("news-enrichment/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            summarize_model: settings.summarize_model.clone(),
            sentiment_model: settings.sentiment_model.clone(),
            bias_model: settings.bias_model.clone(),
        })
    }

    fn model_for(&self, request: &InferenceRequest<'_>) -> &str {
        match request {
            InferenceRequest::Summarize { .. } => &self.summarize_model,
            InferenceRequest::Sentiment { .. } => &self.sentiment_model,
            InferenceRequest::Bias { .. } => &self.bias_model,
        }
    }
}

fn payload(request: &InferenceRequest<'_>) -> Value {
    match request {
        InferenceRequest::Summarize { text } => json!({
            "inputs": text,
            "parameters": { "max_length": 120, "min_length": 30 }
        }),
        InferenceRequest::Sentiment { text } => json!({ "inputs": text }),
        InferenceRequest::Bias { text, labels } => json!({
            "inputs": text,
            "parameters": { "candidate_labels": labels }
        }),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET).collect()
}

/// Map a non-success status to the error taxonomy. The hosted API answers 404
/// for a model that is still being loaded, so it is retried like a 5xx.
pub(crate) fn classify_status(status: u16, body: &str) -> InferenceError {
    let message = format!("HTTP {status}: {}", snippet(body));
    match status {
        429 => InferenceError::RateLimited { message },
        404 | 500..=599 => InferenceError::UpstreamUnavailable { message },
        _ => InferenceError::Rejected { status, message },
    }
}

/// `[{summary_text}]`, `{summary_text}`, or the `generated_text` variants.
pub(crate) fn parse_summary(v: &Value) -> Result<String, InferenceError> {
    let obj = match v {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(v),
        _ => None,
    };
    obj.and_then(|o| o.get("summary_text").or_else(|| o.get("generated_text")))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| InferenceError::invalid(format!("no summary_text in {}", snippet(&v.to_string()))))
}

/// `[{label, score}, ...]` or `[[{label, score}, ...]]`; highest score wins.
pub(crate) fn parse_sentiment(v: &Value) -> Result<String, InferenceError> {
    let candidates = match v.as_array().and_then(|a| a.first()) {
        Some(Value::Array(inner)) => inner.as_slice(),
        Some(_) => v.as_array().map(Vec::as_slice).unwrap_or_default(),
        None => &[],
    };
    candidates
        .iter()
        .filter_map(|c| {
            let label = c.get("label")?.as_str()?;
            let score = c.get("score").and_then(Value::as_f64).unwrap_or(0.0);
            Some((label, score))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(label, _)| label.to_string())
        .ok_or_else(|| InferenceError::invalid(format!("no sentiment label in {}", snippet(&v.to_string()))))
}

/// `{labels: [...], scores: [...]}`; labels come back sorted by score.
pub(crate) fn parse_zero_shot(v: &Value) -> Result<String, InferenceError> {
    v.get("labels")
        .and_then(Value::as_array)
        .and_then(|labels| labels.first())
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| InferenceError::invalid(format!("no labels in {}", snippet(&v.to_string()))))
}

#[async_trait]
impl Provider for HuggingFaceProvider {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError> {
        let model = self.model_for(&request);
        let url = format!("{}/{}", self.base_url, model);

        let mut req = self.http.post(&url).json(&payload(&request));
        if !self.api_token.is_empty() {
            req = req.bearer_auth(&self.api_token);
        }
        let resp = req.send().await.map_err(|e| InferenceError::UpstreamUnavailable {
            message: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {e}")
            },
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| InferenceError::UpstreamUnavailable {
                message: format!("reading body failed: {e}"),
            })?;
        debug!(
            target: "inference",
            model,
            status,
            id = %anon_hash(request.text()),
            body = %snippet(&body),
            "huggingface response"
        );

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &body));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| InferenceError::invalid(format!("non-JSON body: {e}")))?;

        match request {
            InferenceRequest::Summarize { .. } => parse_summary(&value),
            InferenceRequest::Sentiment { .. } => parse_sentiment(&value),
            InferenceRequest::Bias { .. } => parse_zero_shot(&value),
        }
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_shapes() {
        assert_eq!(
            parse_summary(&json!([{ "summary_text": " Short. " }])).unwrap(),
            "Short."
        );
        assert_eq!(
            parse_summary(&json!({ "generated_text": "Gen" })).unwrap(),
            "Gen"
        );
        assert!(parse_summary(&json!({ "error": "loading" })).is_err());
        assert!(parse_summary(&json!([])).is_err());
    }

    #[test]
    fn sentiment_picks_highest_score_in_flat_or_nested_lists() {
        let flat = json!([{ "label": "NEGATIVE", "score": 0.2 }, { "label": "POSITIVE", "score": 0.8 }]);
        assert_eq!(parse_sentiment(&flat).unwrap(), "POSITIVE");
        let nested = json!([[{ "label": "POSITIVE", "score": 0.1 }, { "label": "NEGATIVE", "score": 0.9 }]]);
        assert_eq!(parse_sentiment(&nested).unwrap(), "NEGATIVE");
        assert!(parse_sentiment(&json!({ "label": "POSITIVE" })).is_err());
    }

    #[test]
    fn zero_shot_takes_first_label() {
        let v = json!({ "sequence": "x", "labels": ["center", "left"], "scores": [0.7, 0.3] });
        assert_eq!(parse_zero_shot(&v).unwrap(), "center");
        assert!(parse_zero_shot(&json!({ "labels": [] })).is_err());
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(429, "slow down").kind(), "rate_limited");
        assert_eq!(classify_status(503, "loading").kind(), "upstream_unavailable");
        assert_eq!(classify_status(401, "bad token").kind(), "rejected");
        assert_eq!(classify_status(404, "").kind(), "upstream_unavailable");
        assert_eq!(classify_status(403, "").kind(), "rejected");
    }
}
