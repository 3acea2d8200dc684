//! Jobs flowing from the orchestrators through the queue and back, on in-memory `SQLite`.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use movieclub_common::AppResult;
use movieclub_common::config::{ScheduleConfig, VotingConfig};
use asynq::server::Handler;
use asynq::task::Task;
use movieclub_core::{
    AnswerOutcome, ChatPlatform, EnqueueOutcome, FinishSessionPayload, Job, JobId, JobOutcome,
    JobScheduler, JobState, PollAnswerEvent, PollChoice, ScheduleService, SentPoll,
    SessionService, StartVotingInput, TaskGateway, VoteService, VotingService,
};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::{Movie, movie, session::SessionStatus, voting::VotingKind};
use movieclub_db::repositories::{MovieRepository, SessionRepository};
use movieclub_db::test_utils::sqlite_memory;
use movieclub_queue::{JobProcessor, MemoryTaskQueue};
use sea_orm::{EntityTrait, Set};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

const CHAT_ID: i64 = -42;

#[derive(Default)]
struct RecordingChat {
    next_message: AtomicI32,
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn send_poll(
        &self,
        _chat_id: i64,
        _question: &str,
        _options: &[String],
    ) -> AppResult<SentPoll> {
        let message_id = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SentPoll {
            poll_id: format!("poll-{message_id}"),
            message_id,
        })
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i32) -> AppResult<()> {
        Ok(())
    }

    async fn send_message(&self, _chat_id: i64, text: &str) -> AppResult<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct Setup {
    uow: UnitOfWork,
    chat: Arc<RecordingChat>,
    queue: Arc<MemoryTaskQueue>,
    votes: VoteService,
    voting: VotingService,
    processor: JobProcessor,
}

async fn setup() -> Setup {
    let uow = UnitOfWork::new(Arc::new(sqlite_memory().await.unwrap()));
    let chat = Arc::new(RecordingChat::default());
    let queue = Arc::new(MemoryTaskQueue::new());
    let jobs = JobScheduler::new(queue.clone());
    let schedule = ScheduleService::new(uow.clone(), ScheduleConfig::default());
    let voting = VotingService::new(
        uow.clone(),
        schedule.clone(),
        chat.clone(),
        jobs.clone(),
        VotingConfig::default(),
    );
    let sessions = SessionService::new(uow.clone(), schedule, voting.clone(), jobs);
    let processor = JobProcessor::new(voting.clone(), sessions, queue.clone());

    for id in [10, 20] {
        MovieRepository::new()
            .create(
                uow.connection(),
                movie::ActiveModel {
                    id: Set(id),
                    title: Set(format!("Movie {id}")),
                    description: Set(None),
                    year: Set(None),
                    link: Set(None),
                    rating: Set(None),
                    status: Set(movie::MovieStatus::Suggested),
                    watch_count: Set(0),
                    finished_at: Set(None),
                    suggested_by: Set(None),
                    created_at: Set(Utc::now().fixed_offset()),
                },
            )
            .await
            .unwrap();
    }

    Setup {
        votes: VoteService::new(uow.clone()),
        uow,
        chat,
        queue,
        voting,
        processor,
    }
}

impl Setup {
    async fn answer(&self, poll_id: &str, user_id: i64, option: i32) {
        let outcome = self
            .votes
            .record_answer(PollAnswerEvent {
                poll_id: poll_id.to_string(),
                user_id,
                option_ids: vec![option],
            })
            .await
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::Recorded);
    }

    /// Fire the next job due at `now`, run it and settle it the way the worker server does.
    async fn run_once(&self, now: DateTime<Utc>) -> Option<(JobId, JobOutcome)> {
        let info = self.queue.fire(now.timestamp()).await?;
        let outcome = self.processor.handle(&info.job, now).await.unwrap();
        assert!(self.queue.settle(&info.id).await);
        if let JobOutcome::Deferred { until } = outcome {
            let requeued = self.processor.requeue(info.job, until).await.unwrap();
            assert_eq!(requeued, EnqueueOutcome::Enqueued);
        }
        Some((info.id, outcome))
    }

    async fn ids(&self) -> Vec<JobId> {
        self.queue
            .snapshot()
            .await
            .into_iter()
            .map(|info| info.id)
            .collect()
    }
}

fn at(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).unwrap()
}

#[tokio::test]
async fn test_selection_to_rating_through_the_queue() {
    let s = setup().await;
    let now = Utc::now();

    let started = s
        .voting
        .start_voting(
            StartVotingInput {
                title: "Next movie?".to_string(),
                kind: VotingKind::Selection,
                created_by: 1,
                chat_id: CHAT_ID,
                deadline: now.timestamp() + 600,
                movie_id: None,
                session_id: None,
                options: [10, 20]
                    .into_iter()
                    .map(|movie_id| PollChoice {
                        movie_id,
                        label: format!("Movie {movie_id}"),
                    })
                    .collect(),
            },
            now,
        )
        .await
        .unwrap();
    let poll_id = started.poll.external_poll_id.clone();
    s.answer(&poll_id, 1, 1).await;
    s.answer(&poll_id, 2, 1).await;
    s.answer(&poll_id, 3, 0).await;

    // Nothing is due before the deadline
    assert!(s.run_once(now).await.is_none());

    let closed_at = at(now.timestamp() + 601);
    let (id, settled) = s.run_once(closed_at).await.unwrap();
    assert_eq!(id, JobId::close_voting(VotingKind::Selection, started.voting.id));
    assert_eq!(settled, JobOutcome::Done);

    let session = SessionRepository::new()
        .find_ongoing(s.uow.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        s.ids().await,
        vec![
            JobId::finish_session(session.id),
            JobId::open_rating_voting(session.id, 20),
        ]
    );

    // At the session deadline the session finishes first, then the rating poll opens
    let deadline = at(session.finished_at + 1);
    let (id, settled) = s.run_once(deadline).await.unwrap();
    assert_eq!(id, JobId::finish_session(session.id));
    assert_eq!(settled, JobOutcome::Done);

    let (id, settled) = s.run_once(deadline).await.unwrap();
    assert_eq!(id, JobId::open_rating_voting(session.id, 20));
    assert_eq!(settled, JobOutcome::Done);

    let watched = Movie::find_by_id(20)
        .one(s.uow.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(watched.status, movie::MovieStatus::Watched);
    let finished = SessionRepository::new()
        .find_by_id(s.uow.connection(), session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, SessionStatus::Finished);

    // The rating poll is the second poll sent; options 1..10 map to indexes 0..9
    s.answer("poll-2", 1, 9).await;
    s.answer("poll-2", 2, 6).await;

    let rated_at = at(deadline.timestamp() + 3600);
    let (id, settled) = s.run_once(rated_at).await.unwrap();
    assert!(id.as_str().starts_with("close_rating_voting-"));
    assert_eq!(settled, JobOutcome::Done);

    let rated = Movie::find_by_id(20)
        .one(s.uow.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rated.rating, Some(8.5));
    assert!(s.queue.is_empty().await);

    let messages = s.chat.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("Movie 20"));
    assert!(messages[1].contains("8.50"));
}

#[tokio::test]
async fn test_open_rating_job_defers_until_session_deadline() {
    let s = setup().await;
    let now = Utc::now();

    let started = s
        .voting
        .start_voting(
            StartVotingInput {
                title: "Next movie?".to_string(),
                kind: VotingKind::Selection,
                created_by: 1,
                chat_id: CHAT_ID,
                deadline: now.timestamp() + 60,
                movie_id: None,
                session_id: None,
                options: [10, 20]
                    .into_iter()
                    .map(|movie_id| PollChoice {
                        movie_id,
                        label: format!("Movie {movie_id}"),
                    })
                    .collect(),
            },
            now,
        )
        .await
        .unwrap();
    s.answer(&started.poll.external_poll_id, 1, 0).await;
    s.run_once(at(now.timestamp() + 61)).await.unwrap();

    let session = SessionRepository::new()
        .find_ongoing(s.uow.connection())
        .await
        .unwrap()
        .unwrap();

    // The rating job becomes due before the session deadline here, since the close ran
    // with a clock ahead of the queue's. Firing early puts it back until the deadline.
    s.queue.delete(&JobId::finish_session(session.id)).await.unwrap();
    let rating_id = JobId::open_rating_voting(session.id, 10);
    let info = s.queue.inspect(&rating_id).await.unwrap().unwrap();
    let process_at = info.process_at.unwrap();
    assert!(process_at < session.finished_at - 5);

    let (id, settled) = s.run_once(at(process_at)).await.unwrap();
    assert_eq!(id, rating_id);
    assert_eq!(
        settled,
        JobOutcome::Deferred {
            until: session.finished_at
        }
    );
    let info = s.queue.inspect(&rating_id).await.unwrap().unwrap();
    assert_eq!(info.state, JobState::Scheduled);
    assert_eq!(info.process_at, Some(session.finished_at));
    assert_eq!(info.retried, 0);
}

#[tokio::test]
async fn test_requeue_keeps_a_copy_scheduled_elsewhere() {
    let s = setup().await;
    let job = Job::FinishSession(FinishSessionPayload { session_id: 7 });
    let until = Utc::now().timestamp() + 600;

    s.queue
        .enqueue(job.clone(), std::time::Duration::from_secs(60))
        .await
        .unwrap();
    let outcome = s.processor.requeue(job, until).await.unwrap();

    assert_eq!(outcome, EnqueueOutcome::AlreadyExists);
    let info = s
        .queue
        .inspect(&JobId::finish_session(7))
        .await
        .unwrap()
        .unwrap();
    assert!(info.process_at.unwrap() < until);
}

#[tokio::test]
async fn test_process_task_reports_retryable_failures() {
    let s = setup().await;

    // The session does not exist, which is a stale job and completes quietly
    let stale = Job::FinishSession(FinishSessionPayload { session_id: 404 });
    let task = Task::new("finish_session", &serde_json::to_vec(&stale).unwrap()).unwrap();
    assert!(s.processor.process_task(task).await.is_ok());

    // A payload that is not a job is dropped rather than retried
    let task = Task::new("finish_session", b"{}").unwrap();
    assert!(s.processor.process_task(task).await.is_ok());

    // Losing the database is retryable and goes back to the queue
    s.uow.connection().get_sqlite_connection_pool().close().await;
    let task = Task::new("finish_session", &serde_json::to_vec(&stale).unwrap()).unwrap();
    assert!(s.processor.process_task(task).await.is_err());
}
