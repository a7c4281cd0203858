// src/cache/mod.rs
//! Fingerprint cache: content-addressed store of annotations already computed.
//!
//! A [`CacheKey`] is (task kind, sha256 of the normalized text, parameter set).
//! Two task kinds sharing one fingerprint never collide because the kind is part
//! of the key's equality, not of an ad hoc string.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub use file::FileCache;
pub use memory::MemoryCache;

/// The three annotations the pipeline knows how to derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Summarize,
    Sentiment,
    Bias,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Summarize, TaskKind::Sentiment, TaskKind::Bias];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Summarize => "summarize",
            TaskKind::Sentiment => "sentiment",
            TaskKind::Bias => "bias",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of one unit of inference work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub task: TaskKind,
    /// Hex sha256 of the normalized text.
    pub fingerprint: String,
    /// Ordered parameter set (e.g. candidate labels for bias). Empty for other tasks.
    pub params: Vec<String>,
}

impl CacheKey {
    /// Build a key from raw text; normalization happens here so callers can't skip it.
    pub fn new(task: TaskKind, raw_text: &str, params: &[String]) -> Self {
        Self {
            task,
            fingerprint: fingerprint(raw_text),
            params: params.to_vec(),
        }
    }

    /// Stable digest of the whole key, usable as a file name.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.task.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.fingerprint.as_bytes());
        for p in &self.params {
            hasher.update([0u8]);
            hasher.update(p.as_bytes());
        }
        hex(&hasher.finalize())
    }
}

/// A previously computed annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    pub computed_at: DateTime<Utc>,
}

/// Concurrent-safe get/put over computed annotations.
///
/// Implementations hold their internal lock only for the in-memory read/write.
/// Backing-store failures must degrade to a miss (`None`) on `get` and be
/// swallowed (logged) on `put`; a miss only costs a redundant upstream call.
pub trait FingerprintCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Insert or overwrite. Equal value for an existing key is a no-op.
    fn put(&self, key: CacheKey, value: String);

    /// Number of live entries (diagnostics only).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str;
}

/// Normalize article text before fingerprinting:
/// HTML entities decoded, tags stripped, typographic quotes folded, whitespace collapsed.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Hex sha256 of the normalized text.
pub fn fingerprint(raw_text: &str) -> String {
    let normalized = normalize_text(raw_text);
    hex(&Sha256::digest(normalized.as_bytes()))
}

/// Short anonymized id for logs. Never log raw article text.
pub(crate) fn anon_hash(text: &str) -> String {
    hex(&Sha256::digest(text.as_bytes()))[..12].to_string()
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_markup_and_whitespace() {
        let s = "  <p>Markets&nbsp;rally</p>\n\n on \u{201C}soft landing\u{201D}  ";
        assert_eq!(normalize_text(s), "Markets rally on \"soft landing\"");
    }

    #[test]
    fn fingerprint_ignores_formatting_noise() {
        let a = fingerprint("Fed holds rates.  Stocks rise.");
        let b = fingerprint("<b>Fed holds rates.</b>\nStocks rise.");
        assert_eq!(a, b);
        assert_ne!(a, fingerprint("Fed cuts rates. Stocks rise."));
    }

    #[test]
    fn keys_with_same_text_differ_by_task_and_params() {
        let text = "Senate passes budget bill";
        let labels = vec!["left".to_string(), "right".to_string()];
        let summarize = CacheKey::new(TaskKind::Summarize, text, &[]);
        let sentiment = CacheKey::new(TaskKind::Sentiment, text, &[]);
        let bias = CacheKey::new(TaskKind::Bias, text, &labels);
        let bias_other = CacheKey::new(TaskKind::Bias, text, &labels[..1]);

        assert_eq!(summarize.fingerprint, sentiment.fingerprint);
        assert_ne!(summarize, sentiment);
        assert_ne!(bias, bias_other);
        assert_ne!(summarize.digest(), sentiment.digest());
        assert_eq!(bias.digest(), CacheKey::new(TaskKind::Bias, text, &labels).digest());
    }
}
