//! Job dispatch to the orchestrator handlers.
//!
//! [`JobProcessor`] is the asynq handler for every task type of the movie club. Errors the
//! orchestrators mark retryable go back to asynq, which retries the task and archives it
//! once `max_retry` is spent. Permanent errors are logged and acknowledged.

use asynq::server::Handler;
use asynq::task::Task;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use movieclub_common::{AppError, AppResult};
use movieclub_core::{
    EnqueueOutcome, Job, JobOutcome, JobState, SessionService, TaskQueue, VotingService,
    delay_until,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts to put a deferred job back while its running copy still holds the id.
const REQUEUE_ATTEMPTS: u32 = 50;
const REQUEUE_BACKOFF: Duration = Duration::from_millis(100);

/// Handler for every job kind of the movie club.
#[derive(Clone)]
pub struct JobProcessor {
    voting: VotingService,
    session: SessionService,
    tasks: TaskQueue,
}

impl JobProcessor {
    /// Create a new job processor. `tasks` receives jobs deferred by their handler.
    #[must_use]
    pub fn new(voting: VotingService, session: SessionService, tasks: TaskQueue) -> Self {
        Self {
            voting,
            session,
            tasks,
        }
    }

    /// Handle a job at `now`.
    pub async fn handle(&self, job: &Job, now: DateTime<Utc>) -> AppResult<JobOutcome> {
        info!(job_id = %job.id(), kind = %job.kind(), "Processing job");

        match job {
            Job::CloseSelectionVoting(payload) => {
                self.voting.close_selection_voting(payload, now).await
            }
            Job::CloseRatingVoting(payload) => self.voting.close_rating_voting(payload, now).await,
            Job::FinishSession(payload) => self.session.finish_session_job(payload, now).await,
            Job::OpenRatingVoting(payload) => self.voting.open_rating_voting(payload, now).await,
        }
    }

    /// Enqueue a deferred job again, due at `until`.
    ///
    /// The running copy keeps the id until its handler returns, so this waits for the
    /// worker to release it. A copy someone else scheduled in the meantime is kept.
    pub async fn requeue(&self, job: Job, until: i64) -> AppResult<EnqueueOutcome> {
        let id = job.id();

        for _ in 0..REQUEUE_ATTEMPTS {
            let delay = delay_until(until, Utc::now().timestamp());
            if self.tasks.enqueue(job.clone(), delay).await? == EnqueueOutcome::Enqueued {
                info!(job_id = %id, until, "Deferred job enqueued");
                return Ok(EnqueueOutcome::Enqueued);
            }

            let running = self
                .tasks
                .inspect(&id)
                .await?
                .is_some_and(|info| info.state == JobState::Active);
            if !running {
                return Ok(EnqueueOutcome::AlreadyExists);
            }
            tokio::time::sleep(REQUEUE_BACKOFF).await;
        }

        Err(AppError::Queue(format!("Job {id} is still running")))
    }

    /// Turn a handler result into the verdict asynq acts on.
    fn settle(&self, job: Job, result: AppResult<JobOutcome>) -> asynq::error::Result<()> {
        let id = job.id();
        match result {
            Ok(JobOutcome::Done) => {
                debug!(job_id = %id, "Job completed");
                Ok(())
            }
            Ok(JobOutcome::Deferred { until }) => {
                info!(job_id = %id, until, "Job deferred");
                let processor = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = processor.requeue(job, until).await {
                        error!(job_id = %id, error = %e, "Failed to requeue deferred job");
                    }
                });
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                warn!(job_id = %id, error = %e, "Job failed, returning it to the queue");
                Err(asynq::error::Error::other(e.to_string()))
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Job failed permanently, dropping it");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Handler for JobProcessor {
    async fn process_task(&self, task: Task) -> asynq::error::Result<()> {
        let job: Job = match serde_json::from_slice(task.get_payload()) {
            Ok(job) => job,
            Err(e) => {
                error!(task_type = task.get_type(), error = %e, "Dropping undecodable task");
                return Ok(());
            }
        };

        let result = self.handle(&job, Utc::now()).await;
        self.settle(job, result)
    }
}
