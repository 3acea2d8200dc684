//! In-process task gateway for tests.
//!
//! Holds jobs in a map behind an async mutex and mirrors how asynq treats task ids: an id
//! stays taken while its task waits, runs or sits in the archive. Nothing fires on its
//! own; tests drive jobs with [`MemoryTaskQueue::fire`] and settle them explicitly.

use async_trait::async_trait;
use chrono::Utc;
use movieclub_common::AppResult;
use movieclub_core::{DeleteOutcome, EnqueueOutcome, Job, JobId, JobInfo, JobState, TaskGateway};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    state: JobState,
    process_at: i64,
    retried: u32,
    last_error: Option<String>,
}

impl Entry {
    fn info(&self, id: &JobId) -> JobInfo {
        JobInfo {
            id: id.clone(),
            job: self.job.clone(),
            state: self.state,
            process_at: Some(self.process_at),
            retried: self.retried,
            last_error: self.last_error.clone(),
        }
    }
}

/// In-memory task gateway.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    entries: Mutex<HashMap<JobId, Entry>>,
}

impl MemoryTaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All held jobs, ordered by id.
    pub async fn snapshot(&self) -> Vec<JobInfo> {
        let entries = self.entries.lock().await;
        let mut jobs: Vec<JobInfo> = entries.iter().map(|(id, e)| e.info(id)).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Number of held jobs in any state.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue holds no jobs.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Start the earliest waiting job due at `now`, as a worker would.
    pub async fn fire(&self, now: i64) -> Option<JobInfo> {
        let mut entries = self.entries.lock().await;
        let id = entries
            .iter()
            .filter(|(_, e)| e.state == JobState::Scheduled && e.process_at <= now)
            .min_by(|(a_id, a), (b_id, b)| a.process_at.cmp(&b.process_at).then(a_id.cmp(b_id)))
            .map(|(id, _)| id.clone())?;
        let entry = entries.get_mut(&id)?;
        entry.state = JobState::Active;
        Some(entry.info(&id))
    }

    /// Release a running job after its handler returned.
    pub async fn settle(&self, id: &JobId) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.get(id).is_some_and(|e| e.state == JobState::Active) {
            entries.remove(id);
            return true;
        }
        false
    }

    /// Move a job to the archive, as when it runs out of retries.
    pub async fn archive(&self, id: &JobId, error: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.state = JobState::Archived;
                entry.retried += 1;
                entry.last_error = Some(error.to_string());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TaskGateway for MemoryTaskQueue {
    async fn enqueue(&self, job: Job, delay: Duration) -> AppResult<EnqueueOutcome> {
        let id = job.id();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            return Ok(EnqueueOutcome::AlreadyExists);
        }

        entries.insert(
            id,
            Entry {
                job,
                state: JobState::Scheduled,
                process_at: Utc::now().timestamp() + delay.as_secs() as i64,
                retried: 0,
                last_error: None,
            },
        );
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn inspect(&self, id: &JobId) -> AppResult<Option<JobInfo>> {
        Ok(self.entries.lock().await.get(id).map(|e| e.info(id)))
    }

    async fn delete(&self, id: &JobId) -> AppResult<DeleteOutcome> {
        let mut entries = self.entries.lock().await;
        match entries.get(id).map(|e| e.state) {
            None => Ok(DeleteOutcome::NotFound),
            Some(JobState::Active) => Ok(DeleteOutcome::Running),
            Some(_) => {
                entries.remove(id);
                Ok(DeleteOutcome::Deleted)
            }
        }
    }
}
