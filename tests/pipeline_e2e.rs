// tests/pipeline_e2e.rs
//
// End-to-end: store -> dispatcher -> engine -> stub provider -> store -> metrics.
// Article 2's text makes the stub answer with a malformed payload.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use news_enrichment::cache::{FileCache, FingerprintCache, MemoryCache};
use news_enrichment::config::DispatcherSettings;
use news_enrichment::inference::{BackoffPolicy, InferenceRequest, Provider};
use news_enrichment::metrics::MetricsSnapshot;
use news_enrichment::{
    ArticleStatus, ArticleStore, EnrichmentEngine, InferenceClient, InferenceError, Job,
    JobDispatcher, JobId, JobStatus, MemoryArticleStore,
};

#[derive(Default)]
struct StubProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for StubProvider {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.text().contains("<<garbled>>") {
            return Err(InferenceError::InvalidResponse {
                message: "expected a list".into(),
            });
        }
        Ok(match request {
            InferenceRequest::Summarize { text } => format!("{}…", &text[..text.len().min(12)]),
            InferenceRequest::Sentiment { .. } => "NEGATIVE".into(),
            InferenceRequest::Bias { labels, .. } => labels[1].clone(),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

fn pipeline(
    cache: Arc<dyn FingerprintCache>,
    stub: Arc<StubProvider>,
) -> (JobDispatcher, Arc<MemoryArticleStore>) {
    let store = Arc::new(MemoryArticleStore::new());
    let client = InferenceClient::new(stub).with_backoff(BackoffPolicy {
        max_attempts: 1,
        ..Default::default()
    });
    let engine = Arc::new(EnrichmentEngine::new(
        cache,
        Arc::new(client),
        store.clone(),
        vec!["left".into(), "center".into(), "right".into()],
    ));
    let dispatcher = JobDispatcher::start(
        engine,
        DispatcherSettings {
            workers: 3,
            ..Default::default()
        },
    );
    (dispatcher, store)
}

async fn wait_for(d: &JobDispatcher, id: JobId) -> Job {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = d.status(id).expect("job exists");
        if job.is_terminal() {
            return job;
        }
        assert!(Instant::now() < deadline, "job stuck: {job:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn batch_with_one_malformed_article_completes_with_errors() {
    let stub = Arc::new(StubProvider::default());
    let (d, store) = pipeline(Arc::new(MemoryCache::new()), stub.clone());
    let a1 = store.seed("One", "https://n/1", "Storm closes ports along the coast.");
    let a2 = store.seed("Two", "https://n/2", "Wire copy <<garbled>> beyond repair.");
    let a3 = store.seed("Three", "https://n/3", "Central bank keeps rates on hold.");

    let job_id = d.enqueue(&[a1, a2, a3]).unwrap();
    let job = wait_for(&d, job_id).await;

    assert_eq!(job.status, JobStatus::CompletedWithErrors);
    assert_eq!(job.article_status(a1), Some(ArticleStatus::Done));
    assert_eq!(job.article_status(a2), Some(ArticleStatus::Failed));
    assert_eq!(job.article_status(a3), Some(ArticleStatus::Done));
    assert!(job.completed_at.is_some());
    assert_eq!(job.errors[&a2].len(), 3);

    let snap = MetricsSnapshot::compute(store.as_ref()).await.unwrap();
    assert_eq!(snap.labeled, 2);
    assert_eq!(snap.bias.get("center"), Some(&2));
    assert_eq!(snap.sentiment.get("NEGATIVE"), Some(&2));

    let failed = store.get(a2).await.unwrap().unwrap();
    assert!(failed.summary.is_none() && failed.bias.is_none());
    assert_eq!(d.failed_articles(), vec![a2]);

    // terminal jobs are frozen
    assert_eq!(d.cancel(job_id).unwrap().status, JobStatus::CompletedWithErrors);
}

#[tokio::test]
async fn file_cache_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let text = "Parliament approves the new budget.";

    let first = Arc::new(StubProvider::default());
    {
        let (d, store) = pipeline(Arc::new(FileCache::new(dir.path(), None)), first.clone());
        let id = store.seed("t", "https://n/1", text);
        let job = wait_for(&d, d.enqueue(&[id]).unwrap()).await;
        assert_eq!(job.status, JobStatus::Completed);
    }
    assert_eq!(first.calls.load(Ordering::SeqCst), 3);

    // new process: fresh store, same cache directory
    let second = Arc::new(StubProvider::default());
    let (d, store) = pipeline(Arc::new(FileCache::new(dir.path(), None)), second.clone());
    let id = store.seed("t", "https://elsewhere/1", text);
    let job = wait_for(&d, d.enqueue(&[id]).unwrap()).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(second.calls.load(Ordering::SeqCst), 0, "all three served from disk");
    assert!(store.get(id).await.unwrap().unwrap().summary.is_some());
}
