// src/inference/mod.rs
//! Inference client: the only adapter to the upstream summarization/classification provider.
//!
//! A [`Provider`] performs exactly one upstream call. [`InferenceClient`] wraps it with
//! the per-call timeout, exponential backoff on `RateLimited`/`UpstreamUnavailable`,
//! and the shared [`QuotaBudget`]. No lock is held across a provider call or a sleep.

pub mod backoff;
pub mod budget;
pub mod huggingface;
pub mod lexicon;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::TaskKind;

pub use backoff::BackoffPolicy;
pub use budget::QuotaBudget;
pub use huggingface::HuggingFaceProvider;
pub use lexicon::LexiconProvider;

/// Upstream text cap per request (chars).
pub const MAX_INPUT_CHARS: usize = 3500;
/// Texts longer than this are summarized chunk by chunk.
pub const CHUNKED_SUMMARY_THRESHOLD: usize = 4000;
pub const SUMMARY_CHUNK_CHARS: usize = 3000;

/// Terminal failure of one inference call, after retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InferenceError {
    /// 429 or exhausted local quota. Worth requeueing later.
    #[error("rate limited: {message}")]
    RateLimited { message: String },
    /// 5xx, timeouts, connection failures.
    #[error("upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },
    /// Upstream answered with a payload we can't interpret.
    #[error("invalid upstream response: {message}")]
    InvalidResponse { message: String },
    /// Non-retryable client error (4xx other than 429).
    #[error("upstream rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::RateLimited { .. } | InferenceError::UpstreamUnavailable { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::RateLimited { .. } => "rate_limited",
            InferenceError::UpstreamUnavailable { .. } => "upstream_unavailable",
            InferenceError::InvalidResponse { .. } => "invalid_response",
            InferenceError::Rejected { .. } => "rejected",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        InferenceError::InvalidResponse {
            message: message.into(),
        }
    }
}

/// One logical upstream operation.
#[derive(Debug, Clone, Copy)]
pub enum InferenceRequest<'a> {
    Summarize { text: &'a str },
    Sentiment { text: &'a str },
    Bias { text: &'a str, labels: &'a [String] },
}

impl InferenceRequest<'_> {
    pub fn task(&self) -> TaskKind {
        match self {
            InferenceRequest::Summarize { .. } => TaskKind::Summarize,
            InferenceRequest::Sentiment { .. } => TaskKind::Sentiment,
            InferenceRequest::Bias { .. } => TaskKind::Bias,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            InferenceRequest::Summarize { text }
            | InferenceRequest::Sentiment { text }
            | InferenceRequest::Bias { text, .. } => text,
        }
    }
}

/// Low-level provider: one real call, no retries. Separated so the same retry
/// wrapper serves production, the offline lexicon, and test stubs.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError>;
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn Provider>;

pub struct InferenceClient {
    provider: DynProvider,
    backoff: BackoffPolicy,
    budget: Arc<QuotaBudget>,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(provider: DynProvider) -> Self {
        Self {
            provider,
            backoff: BackoffPolicy::default(),
            budget: Arc::new(QuotaBudget::unlimited()),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_budget(mut self, budget: Arc<QuotaBudget>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub async fn summarize(&self, text: &str) -> Result<String, InferenceError> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        if text.chars().count() <= CHUNKED_SUMMARY_THRESHOLD {
            let trimmed = trim_for_upstream(text, MAX_INPUT_CHARS);
            return self.call(InferenceRequest::Summarize { text: &trimmed }).await;
        }

        let chunks = split_chars(text, SUMMARY_CHUNK_CHARS);
        debug!(target: "inference", chunks = chunks.len(), "chunked summarization");
        let mut partials = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let trimmed = trim_for_upstream(chunk, SUMMARY_CHUNK_CHARS);
            partials.push(self.call(InferenceRequest::Summarize { text: &trimmed }).await?);
        }
        let combined = trim_for_upstream(&partials.join(" "), SUMMARY_CHUNK_CHARS);
        self.call(InferenceRequest::Summarize { text: &combined }).await
    }

    pub async fn classify_sentiment(&self, text: &str) -> Result<String, InferenceError> {
        if text.trim().is_empty() {
            return Ok("NEUTRAL".to_string());
        }
        let trimmed = trim_for_upstream(text, MAX_INPUT_CHARS);
        self.call(InferenceRequest::Sentiment { text: &trimmed }).await
    }

    pub async fn classify_bias(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<String, InferenceError> {
        if labels.is_empty() {
            return Err(InferenceError::Rejected {
                status: 400,
                message: "bias classification needs at least one candidate label".into(),
            });
        }
        if text.trim().is_empty() {
            return Ok("neutral".to_string());
        }
        let trimmed = trim_for_upstream(text, MAX_INPUT_CHARS);
        self.call(InferenceRequest::Bias {
            text: &trimmed,
            labels,
        })
        .await
    }

    /// Run the operation for `task`; `labels` only matters for bias.
    pub async fn run(
        &self,
        task: TaskKind,
        text: &str,
        labels: &[String],
    ) -> Result<String, InferenceError> {
        match task {
            TaskKind::Summarize => self.summarize(text).await,
            TaskKind::Sentiment => self.classify_sentiment(text).await,
            TaskKind::Bias => self.classify_bias(text, labels).await,
        }
    }

    async fn call(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError> {
        let task = request.task().as_str();
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.budget.acquire().await?;

            counter!("inference_requests_total", "task" => task).increment(1);
            let started = Instant::now();
            let result = match tokio::time::timeout(self.timeout, self.provider.infer(request)).await
            {
                Ok(r) => r,
                Err(_) => Err(InferenceError::UpstreamUnavailable {
                    message: format!("timed out after {}ms", self.timeout.as_millis()),
                }),
            };
            histogram!("inference_duration_ms", "task" => task)
                .record(started.elapsed().as_secs_f64() * 1000.0);

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    counter!("inference_retries_total", "task" => task, "kind" => e.kind())
                        .increment(1);
                    warn!(
                        target: "inference",
                        task,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    counter!("inference_failures_total", "task" => task, "kind" => e.kind())
                        .increment(1);
                    warn!(target: "inference", task, attempt, error = %e, "upstream call failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Cap text at `max_chars`; if a sentence end exists past 60% of the cap, cut there.
pub fn trim_for_upstream(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let trimmed: String = text.chars().take(max_chars).collect();
    if let Some(byte_idx) = trimmed.rfind('.') {
        let char_pos = trimmed[..byte_idx].chars().count();
        if char_pos * 10 > max_chars * 6 {
            return trimmed[..=byte_idx].to_string();
        }
    }
    trimmed
}

fn split_chars(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails with `err` for the first `fail_first` calls, then echoes the task name.
    struct Flaky {
        fail_first: u32,
        err: InferenceError,
        calls: AtomicU32,
        seen_at: Mutex<Vec<Instant>>,
    }

    impl Flaky {
        fn new(fail_first: u32, err: InferenceError) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                err,
                calls: AtomicU32::new(0),
                seen_at: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for Flaky {
        async fn infer(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError> {
            self.seen_at.lock().unwrap().push(Instant::now());
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(self.err.clone());
            }
            Ok(format!("{}:{}", request.task(), request.text().len()))
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_millis(350),
            max_attempts,
        }
    }

    fn rate_limited() -> InferenceError {
        InferenceError::RateLimited {
            message: "429".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_then_success_backs_off_exponentially() {
        let flaky = Flaky::new(3, rate_limited());
        let client = InferenceClient::new(flaky.clone()).with_backoff(policy(5));

        let out = client.classify_sentiment("Stocks rally").await.unwrap();
        assert_eq!(out, "sentiment:12");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);

        let seen = flaky.seen_at.lock().unwrap().clone();
        let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1] - w[0]).collect();
        let expected = [100u64, 200, 350];
        assert_eq!(gaps.len(), expected.len());
        for (gap, ms) in gaps.iter().zip(expected) {
            assert!(*gap >= Duration::from_millis(ms), "gap {gap:?} < {ms}ms");
            assert!(*gap < Duration::from_millis(ms + 5), "gap {gap:?} >> {ms}ms");
        }
        assert!(gaps.windows(2).all(|g| g[0] <= g[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_last_error() {
        let flaky = Flaky::new(u32::MAX, rate_limited());
        let client = InferenceClient::new(flaky.clone()).with_backoff(policy(3));

        let err = client.summarize("Long day on the Hill.").await.unwrap_err();
        assert!(matches!(err, InferenceError::RateLimited { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_response_is_not_retried() {
        let flaky = Flaky::new(1, InferenceError::invalid("garbage"));
        let client = InferenceClient::new(flaky.clone()).with_backoff(policy(5));

        let err = client
            .classify_bias("text", &["left".into(), "right".into()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_response");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    struct Slow;

    #[async_trait]
    impl Provider for Slow {
        async fn infer(&self, _request: InferenceRequest<'_>) -> Result<String, InferenceError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("late".into())
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_upstream_unavailable() {
        let client = InferenceClient::new(Arc::new(Slow))
            .with_backoff(policy(2))
            .with_timeout(Duration::from_millis(500));
        let started = Instant::now();
        let err = client.classify_sentiment("x").await.unwrap_err();
        assert!(matches!(err, InferenceError::UpstreamUnavailable { .. }));
        // two timeouts plus one 100ms backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1100), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1200), "{elapsed:?}");
    }

    #[tokio::test]
    async fn long_text_is_summarized_in_chunks() {
        let flaky = Flaky::new(0, rate_limited());
        let client = InferenceClient::new(flaky.clone());
        let text = "word ".repeat(1700); // 8500 chars -> 3 chunks + final pass
        client.summarize(&text).await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_text_short_circuits() {
        let flaky = Flaky::new(0, rate_limited());
        let client = InferenceClient::new(flaky.clone());
        assert_eq!(client.summarize("  ").await.unwrap(), "");
        assert_eq!(client.classify_sentiment("").await.unwrap(), "NEUTRAL");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trim_prefers_sentence_boundary() {
        let text = format!("{}. {}", "a".repeat(80), "b".repeat(40));
        let out = trim_for_upstream(&text, 100);
        assert_eq!(out.len(), 81);
        assert!(out.ends_with('.'));

        // boundary too early -> hard cut
        let early = format!("{}. {}", "a".repeat(10), "b".repeat(200));
        assert_eq!(trim_for_upstream(&early, 100).chars().count(), 100);
    }
}
