// src/jobs/mod.rs
//! Batch enrichment jobs: per-article status plus a monotonic overall status.
//!
//! Article: pending -> running -> done | failed
//! Job:     queued -> running -> completed | completed_with_errors | cancelled
//!
//! Nothing moves backwards, and a job in a terminal state is frozen.

pub mod dispatcher;

pub use dispatcher::{DispatchError, JobDispatcher};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::article::ArticleId;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ArticleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ArticleStatus::Done | ArticleStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub articles: BTreeMap<ArticleId, ArticleStatus>,
    /// article -> (task or stage -> message), only for failed articles.
    pub errors: BTreeMap<ArticleId, BTreeMap<String, String>>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Duplicate ids collapse into one entry. An empty batch is complete on arrival.
    pub fn new(ids: &[ArticleId]) -> Self {
        let mut job = Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            articles: ids.iter().map(|id| (*id, ArticleStatus::Pending)).collect(),
            errors: BTreeMap::new(),
            cancel_requested: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        job.refresh();
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn article_status(&self, id: ArticleId) -> Option<ArticleStatus> {
        self.articles.get(&id).copied()
    }

    /// pending -> running. Returns false (and changes nothing) for any other transition.
    pub fn mark_running(&mut self, id: ArticleId) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self.articles.get_mut(&id) {
            Some(s @ ArticleStatus::Pending) => {
                *s = ArticleStatus::Running;
                if self.status == JobStatus::Queued {
                    self.status = JobStatus::Running;
                }
                true
            }
            _ => false,
        }
    }

    /// running -> done | failed, then re-evaluate the job status.
    pub fn mark_finished(
        &mut self,
        id: ArticleId,
        ok: bool,
        errors: BTreeMap<String, String>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        let Some(s) = self.articles.get_mut(&id) else {
            return false;
        };
        if *s != ArticleStatus::Running {
            return false;
        }
        if ok {
            *s = ArticleStatus::Done;
        } else {
            *s = ArticleStatus::Failed;
            if !errors.is_empty() {
                self.errors.insert(id, errors);
            }
        }
        self.refresh();
        true
    }

    /// Stop handing out this job's pending articles. In-flight ones finish normally.
    pub fn request_cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        self.refresh();
        true
    }

    pub fn ids_with(&self, status: ArticleStatus) -> Vec<ArticleId> {
        self.articles
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn done_ids(&self) -> Vec<ArticleId> {
        self.ids_with(ArticleStatus::Done)
    }

    pub fn failed_ids(&self) -> Vec<ArticleId> {
        self.ids_with(ArticleStatus::Failed)
    }

    fn refresh(&mut self) {
        if self.is_terminal() {
            return;
        }
        let all_terminal = self.articles.values().all(|s| s.is_terminal());
        let any_running = self.articles.values().any(|s| *s == ArticleStatus::Running);
        let next = if all_terminal {
            if self.articles.values().any(|s| *s == ArticleStatus::Failed) {
                JobStatus::CompletedWithErrors
            } else {
                JobStatus::Completed
            }
        } else if self.cancel_requested && !any_running {
            JobStatus::Cancelled
        } else {
            return;
        };
        self.status = next;
        self.completed_at = Some(Utc::now());
    }

    /// Polling view: the job plus done/failed id lists for the dashboard.
    pub fn report(&self) -> JobReport<'_> {
        JobReport {
            done: self.done_ids(),
            failed: self.failed_ids(),
            job: self,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobReport<'a> {
    #[serde(flatten)]
    pub job: &'a Job,
    pub done: Vec<ArticleId>,
    pub failed: Vec<ArticleId>,
}
