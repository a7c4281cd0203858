// src/inference/lexicon.rs
//! Offline provider: lexicon sentiment with negation, keyword bias, lead-sentence summary.
//! Deterministic, no network. Used without an API token and in local/test runs.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use super::{InferenceError, InferenceRequest, Provider};
use crate::cache::normalize_text;

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).unwrap_or_default()
});

/// Cue words per bias label. Labels without cues can still win as the fallback.
static BIAS_CUES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (
            "left",
            &[
                "progressive", "inequality", "union", "unions", "climate", "welfare",
                "medicare", "regulation", "democrats", "activists", "minimum",
            ][..],
        ),
        (
            "right",
            &[
                "conservative", "tax", "taxes", "border", "deregulation", "republicans",
                "patriot", "freedom", "immigration", "spending", "traditional",
            ][..],
        ),
        (
            "center",
            &["bipartisan", "compromise", "moderate", "centrist", "consensus"][..],
        ),
    ])
});

const SUMMARY_SENTENCES: usize = 2;
const SUMMARY_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, Default)]
pub struct LexiconProvider;

impl LexiconProvider {
    pub fn new() -> Self {
        Self
    }

    /// Returns (score, token count). A negator within the previous three tokens
    /// flips the sign of a word's score.
    pub fn score_text(&self, text: &str) -> (i32, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score: i32 = 0;
        for (i, w) in tokens.iter().enumerate() {
            let base = *LEXICON.get(w.as_str()).unwrap_or(&0);
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            score += if negated { -base } else { base };
        }
        (score, tokens.len())
    }

    fn sentiment(&self, text: &str) -> String {
        match self.score_text(text).0 {
            s if s > 0 => "POSITIVE",
            s if s < 0 => "NEGATIVE",
            _ => "NEUTRAL",
        }
        .to_string()
    }

    fn bias(&self, text: &str, labels: &[String]) -> Result<String, InferenceError> {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut best: Option<(&String, usize)> = None;
        for label in labels {
            let cues = BIAS_CUES
                .get(label.to_ascii_lowercase().as_str())
                .copied()
                .unwrap_or(&[]);
            let hits = tokens
                .iter()
                .filter(|t| cues.iter().any(|c| *c == t.as_str()))
                .count();
            if hits > 0 && best.map_or(true, |(_, h)| hits > h) {
                best = Some((label, hits));
            }
        }
        if let Some((label, _)) = best {
            return Ok(label.clone());
        }
        ["neutral", "center"]
            .iter()
            .find_map(|fallback| labels.iter().find(|l| l.eq_ignore_ascii_case(fallback)))
            .or_else(|| labels.first())
            .cloned()
            .ok_or_else(|| InferenceError::invalid("no candidate labels"))
    }

    fn summary(&self, text: &str) -> String {
        let normalized = normalize_text(text);
        let mut out = String::new();
        for sentence in normalized
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(SUMMARY_SENTENCES)
        {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(sentence);
        }
        if out.chars().count() > SUMMARY_MAX_CHARS {
            out = out.chars().take(SUMMARY_MAX_CHARS).collect();
        }
        out
    }
}

#[async_trait]
impl Provider for LexiconProvider {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError> {
        match request {
            InferenceRequest::Summarize { text } => Ok(self.summary(text)),
            InferenceRequest::Sentiment { text } => Ok(self.sentiment(text)),
            InferenceRequest::Bias { text, labels } => self.bias(text, labels),
        }
    }

    fn name(&self) -> &'static str {
        "lexicon"
    }
}

/// Alphanumeric tokens, lower-case.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not" | "no" | "never" | "isn't" | "wasn't" | "aren't" | "won't" | "can't" | "cannot"
            | "without"
    )
}
