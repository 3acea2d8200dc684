//! Task gateway backed by the asynq Redis queue.
//!
//! Every job is an asynq task whose id is the job id, so enqueueing is idempotent per id
//! and cancellation is a delete by id. The payload is the JSON encoded [`Job`].

use asynq::backend::RedisConnectionType;
use asynq::base::keys::TaskState;
use asynq::client::Client;
use asynq::error::Error as AsynqError;
use asynq::inspector::{Inspector, InspectorTrait};
use asynq::task::{Task, TaskInfo};
use async_trait::async_trait;
use movieclub_common::config::{RedisConfig, WorkerConfig};
use movieclub_common::{AppError, AppResult};
use movieclub_core::{DeleteOutcome, EnqueueOutcome, Job, JobId, JobInfo, JobState, TaskGateway};
use std::future::Future;
use std::time::Duration;
use tracing::{info, trace};

/// Task gateway over an asynq client and inspector sharing one queue.
pub struct AsynqTaskQueue {
    client: Client,
    inspector: Inspector,
    queue: String,
    max_retry: i32,
    handler_timeout: Duration,
    operation_timeout: Duration,
}

impl AsynqTaskQueue {
    /// Connect the client and the inspector to Redis.
    pub async fn connect(redis: &RedisConfig, worker: &WorkerConfig) -> AppResult<Self> {
        let client = Client::new(connection(redis)?)
            .await
            .map_err(queue_error)?;
        let inspector = Inspector::new(connection(redis)?)
            .await
            .map_err(queue_error)?;

        info!(queue = %redis.queue, "Connected to task queue");

        Ok(Self {
            client,
            inspector,
            queue: redis.queue.clone(),
            max_retry: i32::try_from(worker.max_retry).unwrap_or(i32::MAX),
            handler_timeout: worker.handler_timeout(),
            operation_timeout: Duration::from_millis(redis.operation_timeout_ms),
        })
    }

    /// Encode a job as a task on the configured queue.
    pub fn task(&self, job: &Job) -> AppResult<Task> {
        let payload = serde_json::to_vec(job)
            .map_err(|e| AppError::Internal(format!("Failed to encode job: {e}")))?;

        Ok(Task::new(job.kind().as_str(), &payload)
            .map_err(queue_error)?
            .with_task_id(job.id().as_str())
            .with_queue(&self.queue)
            .with_max_retry(self.max_retry)
            .with_timeout(self.handler_timeout))
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> AppResult<asynq::error::Result<T>>
    where
        F: Future<Output = asynq::error::Result<T>> + Send,
    {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| AppError::Timeout(format!("task queue {op}")))
    }
}

/// Redis connection settings for asynq.
pub fn connection(redis: &RedisConfig) -> AppResult<RedisConnectionType> {
    RedisConnectionType::single(redis.url.as_str()).map_err(queue_error)
}

pub(crate) fn queue_error(e: AsynqError) -> AppError {
    match e {
        AsynqError::Timeout => AppError::Timeout("task queue".to_string()),
        other => AppError::Queue(other.to_string()),
    }
}

fn is_not_found(e: &AsynqError) -> bool {
    matches!(e, AsynqError::TaskNotFound { .. })
        || e.to_string().to_lowercase().contains("not found")
}

/// Map an asynq task to a job snapshot. Completed tasks no longer hold their id.
fn job_info(info: TaskInfo) -> AppResult<Option<JobInfo>> {
    let state = match info.state {
        TaskState::Active => JobState::Active,
        TaskState::Archived => JobState::Archived,
        TaskState::Completed => return Ok(None),
        _ => JobState::Scheduled,
    };
    let job: Job = serde_json::from_slice(&info.payload)
        .map_err(|e| AppError::Queue(format!("Undecodable task {}: {e}", info.id)))?;

    Ok(Some(JobInfo {
        id: job.id(),
        job,
        state,
        process_at: info.next_process_at.map(|at| at.timestamp()),
        retried: u32::try_from(info.retried).unwrap_or(0),
        last_error: info.last_err,
    }))
}

#[async_trait]
impl TaskGateway for AsynqTaskQueue {
    async fn enqueue(&self, job: Job, delay: Duration) -> AppResult<EnqueueOutcome> {
        let id = job.id();
        let task = self.task(&job)?;

        let result = if delay.is_zero() {
            self.bounded("enqueue", self.client.enqueue(task)).await?
        } else {
            self.bounded("enqueue", self.client.enqueue_in(task, delay))
                .await?
        };

        match result {
            Ok(_) => {
                trace!(job_id = %id, ?delay, "Enqueued task");
                Ok(EnqueueOutcome::Enqueued)
            }
            Err(AsynqError::TaskIdConflict | AsynqError::TaskDuplicate) => {
                Ok(EnqueueOutcome::AlreadyExists)
            }
            Err(e) => Err(queue_error(e)),
        }
    }

    async fn inspect(&self, id: &JobId) -> AppResult<Option<JobInfo>> {
        match self
            .bounded(
                "inspect",
                self.inspector.get_task_info(&self.queue, id.as_str()),
            )
            .await?
        {
            Ok(info) => job_info(info),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(queue_error(e)),
        }
    }

    async fn delete(&self, id: &JobId) -> AppResult<DeleteOutcome> {
        match self
            .bounded("delete", self.inspector.delete_task(&self.queue, id.as_str()))
            .await?
        {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_not_found(&e) => Ok(DeleteOutcome::NotFound),
            Err(e) if e.to_string().to_lowercase().contains("active") => {
                Ok(DeleteOutcome::Running)
            }
            Err(e) => Err(queue_error(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use movieclub_core::FinishSessionPayload;

    fn task_info(state: TaskState, payload: Vec<u8>) -> TaskInfo {
        TaskInfo {
            id: "finish_session-4".to_string(),
            queue: "movieclub".to_string(),
            task_type: "finish_session".to_string(),
            payload,
            headers: Default::default(),
            state,
            max_retry: 1,
            retried: 1,
            last_err: Some("db down".to_string()),
            last_failed_at: None,
            timeout: None,
            deadline: None,
            group: None,
            next_process_at: Some(Utc.timestamp_opt(1_900_000_000, 0).unwrap()),
            is_orphaned: false,
            retention: None,
            completed_at: None,
            result: None,
        }
    }

    fn finish_payload() -> Vec<u8> {
        serde_json::to_vec(&Job::FinishSession(FinishSessionPayload { session_id: 4 })).unwrap()
    }

    #[test]
    fn test_job_info_maps_states() {
        let info = job_info(task_info(TaskState::Retry, finish_payload()))
            .unwrap()
            .unwrap();
        assert_eq!(info.id, JobId::finish_session(4));
        assert_eq!(info.state, JobState::Scheduled);
        assert_eq!(info.process_at, Some(1_900_000_000));
        assert_eq!(info.retried, 1);
        assert_eq!(info.last_error.as_deref(), Some("db down"));

        let active = job_info(task_info(TaskState::Active, finish_payload()))
            .unwrap()
            .unwrap();
        assert_eq!(active.state, JobState::Active);

        let archived = job_info(task_info(TaskState::Archived, finish_payload()))
            .unwrap()
            .unwrap();
        assert_eq!(archived.state, JobState::Archived);

        assert!(
            job_info(task_info(TaskState::Completed, finish_payload()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_job_info_rejects_foreign_payload() {
        let result = job_info(task_info(TaskState::Pending, b"not json".to_vec()));
        assert!(matches!(result, Err(AppError::Queue(_))));
    }

    #[test]
    fn test_not_found_errors() {
        assert!(is_not_found(&AsynqError::TaskNotFound {
            id: "x".to_string()
        }));
        assert!(is_not_found(&AsynqError::other("Task not found")));
        assert!(!is_not_found(&AsynqError::other("Cannot delete active task")));
    }
}
