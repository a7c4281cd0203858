// src/config/inference.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

use crate::inference::BackoffPolicy;

pub const ENV_HF_TOKEN: &str = "HF_TOKEN";
pub const ENV_INFERENCE_MODE: &str = "INFERENCE_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    /// Remote HuggingFace Inference API.
    #[default]
    HuggingFace,
    /// Offline deterministic provider.
    Lexicon,
}

fn default_bias_labels() -> Vec<String> {
    ["left", "center", "right", "neutral"]
        .map(String::from)
        .to_vec()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub mode: InferenceMode,
    pub base_url: String,
    /// "ENV" means: read from HF_TOKEN.
    pub api_token: String,
    pub summarize_model: String,
    pub sentiment_model: String,
    pub bias_model: String,
    pub bias_labels: Vec<String>,
    /// Wall-clock budget per upstream call.
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Shared pacing across all task kinds. Absent = no pacing.
    pub requests_per_minute: Option<u32>,
    /// Hard daily cap across all task kinds. Absent = no cap.
    pub daily_limit: Option<u32>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            mode: InferenceMode::HuggingFace,
            base_url: "https://api-inference.huggingface.co/models".to_string(),
            api_token: "ENV".to_string(),
            summarize_model: "facebook/bart-large-cnn".to_string(),
            sentiment_model: "distilbert-base-uncased-finetuned-sst-2-english".to_string(),
            bias_model: "facebook/bart-large-mnli".to_string(),
            bias_labels: default_bias_labels(),
            request_timeout_ms: 30_000,
            max_attempts: 4,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            requests_per_minute: None,
            daily_limit: None,
        }
    }
}

impl InferenceSettings {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.base_delay_ms),
            factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub(super) fn finalize(&mut self) -> Result<()> {
        if self.api_token.trim().eq_ignore_ascii_case("env") {
            self.api_token = env::var(ENV_HF_TOKEN).unwrap_or_default();
        }

        if let Ok(raw) = env::var(ENV_INFERENCE_MODE) {
            self.mode = match raw.trim().to_ascii_lowercase().as_str() {
                "huggingface" | "hf" => InferenceMode::HuggingFace,
                "lexicon" | "offline" | "mock" => InferenceMode::Lexicon,
                other => bail!("unsupported {ENV_INFERENCE_MODE}: {other}"),
            };
        }

        let defaults = Self::default();
        self.bias_labels.retain(|l| !l.trim().is_empty());
        if self.bias_labels.is_empty() {
            self.bias_labels = defaults.bias_labels;
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            self.backoff_factor = defaults.backoff_factor;
        }
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = defaults.request_timeout_ms;
        }
        if self.max_delay_ms < self.base_delay_ms {
            // keep a valid interval
            std::mem::swap(&mut self.max_delay_ms, &mut self.base_delay_ms);
        }
        Ok(())
    }
}
