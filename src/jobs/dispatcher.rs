// src/jobs/dispatcher.rs
//! Bounded worker pool behind an mpsc queue. `enqueue` returns at once; workers
//! pull one article at a time, run it through the engine and record the outcome
//! on the owning job. Concurrency is the worker count, not the request volume.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ArticleStatus, Job, JobId};
use crate::article::{ArticleId, StoreError};
use crate::config::DispatcherSettings;
use crate::engine::EnrichmentEngine;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher queue is full ({capacity} slots free, {requested} needed)")]
    QueueFull { capacity: usize, requested: usize },
    #[error("dispatcher is shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
struct WorkItem {
    job_id: JobId,
    article_id: ArticleId,
    requeues: u32,
}

#[derive(Default)]
struct JobRegistry {
    jobs: HashMap<JobId, Job>,
    /// Terminal jobs in the order they finished, for retention.
    finished: VecDeque<JobId>,
}

impl JobRegistry {
    fn note_if_terminal(&mut self, id: JobId, max_retained: usize) {
        let Some(job) = self.jobs.get(&id) else {
            return;
        };
        if !job.is_terminal() || self.finished.contains(&id) {
            return;
        }
        counter!("jobs_finished_total", "status" => job.status.as_str()).increment(1);
        info!(
            target: "jobs",
            job_id = %id,
            status = job.status.as_str(),
            done = job.done_ids().len(),
            failed = job.failed_ids().len(),
            "job finished"
        );
        self.finished.push_back(id);
        while self.finished.len() > max_retained {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }
}

struct Shared {
    engine: Arc<EnrichmentEngine>,
    settings: DispatcherSettings,
    tx: mpsc::Sender<WorkItem>,
    registry: Mutex<JobRegistry>,
    failed: Mutex<HashSet<ArticleId>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, JobRegistry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn failed(&self) -> MutexGuard<'_, HashSet<ArticleId>> {
        self.failed.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record a terminal article outcome on its job and the failed registry.
    fn finish(&self, item: WorkItem, ok: bool, errors: BTreeMap<String, String>) {
        {
            let mut failed = self.failed();
            if ok {
                failed.remove(&item.article_id);
            } else {
                failed.insert(item.article_id);
            }
        }
        let mut reg = self.registry();
        if let Some(job) = reg.jobs.get_mut(&item.job_id) {
            job.mark_finished(item.article_id, ok, errors);
        }
        reg.note_if_terminal(item.job_id, self.settings.max_retained_jobs);
    }

    /// Fail articles that never made it onto the queue. They land in the failed
    /// registry like any other failure.
    fn fail_unqueued(&self, job_id: JobId, ids: &[ArticleId], reason: &str) {
        let errors = BTreeMap::from([("queue".to_string(), reason.to_string())]);
        for id in ids {
            if let Some(job) = self.registry().jobs.get_mut(&job_id) {
                job.mark_running(*id);
            }
            let item = WorkItem {
                job_id,
                article_id: *id,
                requeues: 0,
            };
            self.finish(item, false, errors.clone());
        }
    }

    /// Decide whether a worker should run this item. Marks fresh items running.
    fn claim(&self, item: WorkItem) -> Claim {
        let mut reg = self.registry();
        let Some(job) = reg.jobs.get_mut(&item.job_id) else {
            return Claim::Skip;
        };
        if job.cancel_requested {
            return if job.article_status(item.article_id) == Some(ArticleStatus::Running) {
                Claim::CancelledWhileWaiting
            } else {
                Claim::Skip
            };
        }
        if item.requeues > 0 {
            return Claim::Run;
        }
        if job.mark_running(item.article_id) {
            Claim::Run
        } else {
            Claim::Skip
        }
    }

    fn cancel_requested(&self, job_id: JobId) -> bool {
        self.registry()
            .jobs
            .get(&job_id)
            .is_some_and(|j| j.cancel_requested)
    }
}

enum Claim {
    Run,
    Skip,
    /// A requeued article came back after its job was cancelled.
    CancelledWhileWaiting,
}

/// Cheap to clone; all clones share the same queue and job registry.
#[derive(Clone)]
pub struct JobDispatcher {
    shared: Arc<Shared>,
}

impl JobDispatcher {
    /// Spawn `settings.workers` workers on the current tokio runtime.
    pub fn start(engine: Arc<EnrichmentEngine>, settings: DispatcherSettings) -> Self {
        let workers = settings.workers.max(1);
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            engine,
            settings,
            tx,
            registry: Mutex::new(JobRegistry::default()),
            failed: Mutex::new(HashSet::new()),
        });
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for idx in 0..workers {
            spawn_worker(idx, shared.clone(), rx.clone());
        }
        gauge!("dispatcher_workers").set(workers as f64);
        info!(target: "jobs", workers, "dispatcher started");
        Self { shared }
    }

    /// Create a job for `ids` and queue its articles. Passing an id explicitly
    /// clears it from the failed registry.
    pub fn enqueue(&self, ids: &[ArticleId]) -> Result<JobId, DispatchError> {
        let job = Job::new(ids);
        let job_id = job.id;
        let article_ids: Vec<ArticleId> = job.articles.keys().copied().collect();

        let free = self.shared.tx.capacity();
        if free < article_ids.len() {
            return Err(DispatchError::QueueFull {
                capacity: free,
                requested: article_ids.len(),
            });
        }
        {
            let mut failed = self.shared.failed();
            for id in &article_ids {
                failed.remove(id);
            }
        }
        {
            let mut reg = self.shared.registry();
            reg.jobs.insert(job_id, job);
            reg.note_if_terminal(job_id, self.shared.settings.max_retained_jobs);
        }

        for (pos, article_id) in article_ids.iter().enumerate() {
            let item = WorkItem {
                job_id,
                article_id: *article_id,
                requeues: 0,
            };
            if let Err(e) = self.shared.tx.try_send(item) {
                // lost a race for queue slots; fail what could not be queued
                warn!(target: "jobs", job_id = %job_id, error = %e, "queue rejected work item");
                self.shared.fail_unqueued(job_id, &article_ids[pos..], &e.to_string());
                break;
            }
        }

        counter!("jobs_enqueued_total").increment(1);
        info!(target: "jobs", job_id = %job_id, articles = article_ids.len(), "job enqueued");
        Ok(job_id)
    }

    /// Queue up to `limit` articles that have no summary yet, skipping articles
    /// that failed before and ones already waiting in an active job.
    /// `None` when there is nothing to do.
    pub async fn enqueue_pending(&self, limit: usize) -> Result<Option<JobId>, DispatchError> {
        let skip: HashSet<ArticleId> = {
            let mut s = self.shared.failed().clone();
            let reg = self.shared.registry();
            for job in reg.jobs.values().filter(|j| !j.is_terminal()) {
                s.extend(
                    job.articles
                        .iter()
                        .filter(|(_, st)| !st.is_terminal())
                        .map(|(id, _)| *id),
                );
            }
            s
        };
        let candidates = self
            .shared
            .engine
            .store()
            .list_unenriched(limit.saturating_add(skip.len()))
            .await?;
        let ids: Vec<ArticleId> = candidates
            .into_iter()
            .map(|a| a.id)
            .filter(|id| !skip.contains(id))
            .take(limit)
            .collect();
        if ids.is_empty() {
            debug!(target: "jobs", skipped = skip.len(), "nothing to enqueue");
            return Ok(None);
        }
        self.enqueue(&ids).map(Some)
    }

    pub fn status(&self, id: JobId) -> Option<Job> {
        self.shared.registry().jobs.get(&id).cloned()
    }

    /// Request cancellation. Terminal jobs are returned unchanged.
    pub fn cancel(&self, id: JobId) -> Option<Job> {
        let mut reg = self.shared.registry();
        let job = reg.jobs.get_mut(&id)?;
        if job.request_cancel() {
            info!(target: "jobs", job_id = %id, "cancel requested");
        }
        reg.note_if_terminal(id, self.shared.settings.max_retained_jobs);
        reg.jobs.get(&id).cloned()
    }

    /// Articles whose latest run ended failed and that were not re-enqueued since.
    pub fn failed_articles(&self) -> Vec<ArticleId> {
        let mut ids: Vec<ArticleId> = self.shared.failed().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn engine(&self) -> &Arc<EnrichmentEngine> {
        &self.shared.engine
    }
}

fn spawn_worker(
    idx: usize,
    shared: Arc<Shared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
) {
    tokio::spawn(async move {
        loop {
            let next = { rx.lock().await.recv().await };
            let Some(item) = next else {
                debug!(target: "jobs", worker = idx, "queue closed, worker exiting");
                break;
            };
            process(&shared, item).await;
        }
    });
}

async fn process(shared: &Arc<Shared>, item: WorkItem) {
    match shared.claim(item) {
        Claim::Skip => return,
        Claim::CancelledWhileWaiting => {
            let reason = BTreeMap::from([(
                "cancelled".to_string(),
                "job cancelled before retry".to_string(),
            )]);
            shared.finish(item, false, reason);
            return;
        }
        Claim::Run => {}
    }

    let outcome = shared.engine.enrich_by_id(item.article_id).await;
    match outcome {
        Ok(out) if out.is_complete() => shared.finish(item, true, BTreeMap::new()),
        Ok(out)
            if out.only_rate_limited()
                && item.requeues < shared.settings.max_requeues
                && !shared.cancel_requested(item.job_id) =>
        {
            requeue(shared.clone(), item);
        }
        Ok(out) => shared.finish(item, false, out.error_summary()),
        Err(e) => {
            warn!(
                target: "jobs",
                job_id = %item.job_id,
                article_id = item.article_id,
                error = %e,
                "article not enriched"
            );
            shared.finish(item, false, BTreeMap::from([("enrich".to_string(), e.to_string())]));
        }
    }
}

/// Put a rate-limited article back on the queue after a delay. It stays `running`.
fn requeue(shared: Arc<Shared>, item: WorkItem) {
    let delay = Duration::from_millis(shared.settings.requeue_delay_ms);
    let next = WorkItem {
        requeues: item.requeues + 1,
        ..item
    };
    info!(
        target: "jobs",
        job_id = %item.job_id,
        article_id = item.article_id,
        attempt = next.requeues,
        delay_ms = delay.as_millis() as u64,
        "rate limited, requeueing article"
    );
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if shared.tx.send(next).await.is_err() {
            let reason = BTreeMap::from([("queue".to_string(), DispatchError::Closed.to_string())]);
            shared.finish(item, false, reason);
        }
    });
}
