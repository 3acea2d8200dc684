//! Deferred job definitions and the task gateway port.
//!
//! Every job has a deterministic id built from its kind and the ids of the entities it
//! acts on. Enqueuing the same logical job twice therefore collides on the id instead of
//! creating a duplicate, and cancellation is a direct delete by id.

use async_trait::async_trait;
use movieclub_common::AppResult;
use movieclub_db::entities::voting::VotingKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Movie reference carried by open rating voting jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieRef {
    pub id: i64,
    pub title: String,
}

/// Payload of close voting jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseVotingPayload {
    /// Platform poll id.
    pub poll_id: String,
    pub message_id: i32,
    pub chat_id: i64,
    pub voting_id: i32,
    /// Rated movie, rating votings only.
    pub movie_id: Option<i64>,
    /// User who started the voting.
    pub user_id: i64,
}

/// Payload of finish session jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishSessionPayload {
    pub session_id: i32,
}

/// Payload of open rating voting jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRatingVotingPayload {
    pub chat_id: i64,
    pub session_id: i32,
    pub movie: MovieRef,
    /// User recorded as the creator of the rating voting.
    pub user_id: i64,
}

/// A deferred job with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Job {
    CloseSelectionVoting(CloseVotingPayload),
    CloseRatingVoting(CloseVotingPayload),
    FinishSession(FinishSessionPayload),
    OpenRatingVoting(OpenRatingVotingPayload),
}

impl Job {
    /// Build the close job matching a voting kind.
    #[must_use]
    pub const fn close_voting(kind: VotingKind, payload: CloseVotingPayload) -> Self {
        match kind {
            VotingKind::Selection => Self::CloseSelectionVoting(payload),
            VotingKind::Rating => Self::CloseRatingVoting(payload),
        }
    }

    /// The kind of this job.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::CloseSelectionVoting(_) => JobKind::CloseSelectionVoting,
            Self::CloseRatingVoting(_) => JobKind::CloseRatingVoting,
            Self::FinishSession(_) => JobKind::FinishSession,
            Self::OpenRatingVoting(_) => JobKind::OpenRatingVoting,
        }
    }

    /// The deterministic id of this job.
    #[must_use]
    pub fn id(&self) -> JobId {
        match self {
            Self::CloseSelectionVoting(p) => JobId::close_voting(VotingKind::Selection, p.voting_id),
            Self::CloseRatingVoting(p) => JobId::close_voting(VotingKind::Rating, p.voting_id),
            Self::FinishSession(p) => JobId::finish_session(p.session_id),
            Self::OpenRatingVoting(p) => JobId::open_rating_voting(p.session_id, p.movie.id),
        }
    }
}

/// Job kinds, one handler each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CloseSelectionVoting,
    CloseRatingVoting,
    FinishSession,
    OpenRatingVoting,
}

impl JobKind {
    /// Stable name, also the prefix of the job id.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CloseSelectionVoting => "close_selection_voting",
            Self::CloseRatingVoting => "close_rating_voting",
            Self::FinishSession => "finish_session",
            Self::OpenRatingVoting => "open_rating_voting",
        }
    }

    /// Close job kind for a voting kind.
    #[must_use]
    pub const fn close_voting(kind: VotingKind) -> Self {
        match kind {
            VotingKind::Selection => Self::CloseSelectionVoting,
            VotingKind::Rating => Self::CloseRatingVoting,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic job id. Only constructible from the id templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// `close_selection_voting-{votingId}` or `close_rating_voting-{votingId}`.
    #[must_use]
    pub fn close_voting(kind: VotingKind, voting_id: i32) -> Self {
        Self(format!("{}-{voting_id}", JobKind::close_voting(kind).as_str()))
    }

    /// `finish_session-{sessionId}`.
    #[must_use]
    pub fn finish_session(session_id: i32) -> Self {
        Self(format!("{}-{session_id}", JobKind::FinishSession.as_str()))
    }

    /// `open_rating_voting-{sessionId}-{movieId}`.
    #[must_use]
    pub fn open_rating_voting(session_id: i32, movie_id: i64) -> Self {
        Self(format!(
            "{}-{session_id}-{movie_id}",
            JobKind::OpenRatingVoting.as_str()
        ))
    }

    /// The id as stored by the queue.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its process time (first run or retry).
    Scheduled,
    /// Picked up by a worker.
    Active,
    /// Out of retries and kept for inspection.
    Archived,
}

/// Snapshot of a job held by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub job: Job,
    pub state: JobState,
    /// Unix time the job becomes due, when the queue reports it.
    pub process_at: Option<i64>,
    /// Failed attempts so far.
    pub retried: u32,
    pub last_error: Option<String>,
}

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id is already held by the queue; nothing was changed.
    AlreadyExists,
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already fired or already deleted.
    NotFound,
    /// A worker is running the job right now; its handler guard makes it a no-op.
    Running,
}

/// Durable, time-delayed, at-least-once task queue.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// Enqueue a job to run after `delay`. Idempotent per job id.
    async fn enqueue(&self, job: Job, delay: Duration) -> AppResult<EnqueueOutcome>;

    /// Look up a job by id.
    async fn inspect(&self, id: &JobId) -> AppResult<Option<JobInfo>>;

    /// Delete a job by id.
    async fn delete(&self, id: &JobId) -> AppResult<DeleteOutcome>;
}

/// Seconds a session deadline may lie ahead of the firing time before a job is deferred.
pub const DEADLINE_TOLERANCE_SECS: i64 = 5;

/// Result of running a job handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job is finished, including when it turned out to be stale.
    Done,
    /// The job fired before its entity was due; run it again at `until`.
    Deferred { until: i64 },
}

/// Type alias for a shared task gateway.
pub type TaskQueue = Arc<dyn TaskGateway>;

/// Delay from `now` until `deadline` (both unix seconds), zero if already due.
#[must_use]
pub fn delay_until(deadline: i64, now: i64) -> Duration {
    Duration::from_secs(u64::try_from(deadline.saturating_sub(now)).unwrap_or(0))
}

/// Deadline-based scheduling on top of a [`TaskGateway`].
#[derive(Clone)]
pub struct JobScheduler {
    tasks: TaskQueue,
}

impl JobScheduler {
    /// Create a new job scheduler.
    #[must_use]
    pub fn new(tasks: TaskQueue) -> Self {
        Self { tasks }
    }

    /// Enqueue a job due at `deadline`.
    pub async fn schedule(&self, job: Job, deadline: i64, now: i64) -> AppResult<EnqueueOutcome> {
        let id = job.id();
        let outcome = self.tasks.enqueue(job, delay_until(deadline, now)).await?;
        debug!(job_id = %id, deadline, ?outcome, "Scheduled job");
        Ok(outcome)
    }

    /// Enqueue a job unless the queue already holds one with the same id.
    pub async fn schedule_once(
        &self,
        job: Job,
        deadline: i64,
        now: i64,
    ) -> AppResult<EnqueueOutcome> {
        if self.tasks.inspect(&job.id()).await?.is_some() {
            return Ok(EnqueueOutcome::AlreadyExists);
        }
        self.schedule(job, deadline, now).await
    }

    /// Replace a scheduled job with one due at `deadline`, keeping the stored payload if any.
    ///
    /// `fallback` is used when the queue no longer holds the job.
    pub async fn reschedule(
        &self,
        fallback: Job,
        deadline: i64,
        now: i64,
    ) -> AppResult<EnqueueOutcome> {
        let id = fallback.id();
        let job = match self.tasks.inspect(&id).await? {
            Some(info) => info.job,
            None => fallback,
        };

        match self.tasks.delete(&id).await? {
            DeleteOutcome::Running => {
                warn!(job_id = %id, "Job is running, not rescheduling");
                Ok(EnqueueOutcome::AlreadyExists)
            }
            DeleteOutcome::Deleted | DeleteOutcome::NotFound => {
                self.schedule(job, deadline, now).await
            }
        }
    }

    /// Make sure the queue holds the job, due at `deadline`. Returns whether the queue changed.
    ///
    /// A missing job is enqueued and an archived one replaced, since the entity it guards
    /// is still open. A job waiting for a different time is moved. Running and retrying
    /// jobs are left alone.
    pub async fn ensure_scheduled(&self, job: Job, deadline: i64, now: i64) -> AppResult<bool> {
        let target = deadline.max(now);
        match self.tasks.inspect(&job.id()).await? {
            None => Ok(self.schedule(job, deadline, now).await? == EnqueueOutcome::Enqueued),
            Some(info) if info.state == JobState::Archived => {
                warn!(
                    job_id = %info.id,
                    retried = info.retried,
                    last_error = info.last_error.as_deref().unwrap_or(""),
                    "Replacing archived job"
                );
                Ok(self.reschedule(job, deadline, now).await? == EnqueueOutcome::Enqueued)
            }
            Some(info)
                if info.state == JobState::Scheduled
                    && info.retried == 0
                    && info
                        .process_at
                        .is_some_and(|at| (at - target).abs() > DEADLINE_TOLERANCE_SECS) =>
            {
                Ok(self.reschedule(job, deadline, now).await? == EnqueueOutcome::Enqueued)
            }
            Some(_) => Ok(false),
        }
    }

    /// Delete a job by id.
    pub async fn cancel(&self, id: &JobId) -> AppResult<DeleteOutcome> {
        let outcome = self.tasks.delete(id).await?;
        debug!(job_id = %id, ?outcome, "Cancelled job");
        Ok(outcome)
    }

    /// Like [`JobScheduler::schedule_once`], logging instead of failing.
    ///
    /// Used after a database commit, where the queue mutation cannot be rolled back into
    /// the transaction. Missing jobs are restored by the session reconciliation pass.
    pub async fn schedule_once_logged(
        &self,
        job: Job,
        deadline: i64,
        now: i64,
    ) -> Option<EnqueueOutcome> {
        let id = job.id();
        match self.schedule_once(job, deadline, now).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Failed to schedule job after commit");
                None
            }
        }
    }

    /// Like [`JobScheduler::cancel`], logging instead of failing.
    pub async fn cancel_logged(&self, id: &JobId) {
        if let Err(e) = self.cancel(id).await {
            warn!(job_id = %id, error = %e, "Failed to cancel job after commit");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn close_payload(voting_id: i32) -> CloseVotingPayload {
        CloseVotingPayload {
            poll_id: "5390000000000000001".to_string(),
            message_id: 12,
            chat_id: -100_123,
            voting_id,
            movie_id: None,
            user_id: 7,
        }
    }

    #[test]
    fn test_job_id_templates() {
        assert_eq!(
            JobId::close_voting(VotingKind::Selection, 3).as_str(),
            "close_selection_voting-3"
        );
        assert_eq!(
            JobId::close_voting(VotingKind::Rating, 3).as_str(),
            "close_rating_voting-3"
        );
        assert_eq!(JobId::finish_session(9).as_str(), "finish_session-9");
        assert_eq!(
            JobId::open_rating_voting(9, 42).as_str(),
            "open_rating_voting-9-42"
        );
    }

    #[test]
    fn test_job_id_follows_payload() {
        let job = Job::close_voting(VotingKind::Rating, close_payload(5));
        assert_eq!(job.kind(), JobKind::CloseRatingVoting);
        assert_eq!(job.id(), JobId::close_voting(VotingKind::Rating, 5));

        let job = Job::OpenRatingVoting(OpenRatingVotingPayload {
            chat_id: 1,
            session_id: 2,
            movie: MovieRef {
                id: 3,
                title: "Solaris".to_string(),
            },
            user_id: 4,
        });
        assert_eq!(job.id().to_string(), "open_rating_voting-2-3");
    }

    #[test]
    fn test_job_wire_format() {
        let job = Job::FinishSession(FinishSessionPayload { session_id: 4 });
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "finish_session", "payload": {"session_id": 4}})
        );

        let job = Job::close_voting(VotingKind::Selection, close_payload(1));
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(serde_json::from_str::<Job>(&json).unwrap(), job);
    }

    #[test]
    fn test_delay_until_saturates() {
        assert_eq!(delay_until(110, 100), Duration::from_secs(10));
        assert_eq!(delay_until(100, 100), Duration::ZERO);
        assert_eq!(delay_until(90, 100), Duration::ZERO);
    }
}
