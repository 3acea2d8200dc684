//! Webhook integration tests.

#![allow(clippy::unwrap_used)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use movieclub_common::config::{ScheduleConfig, VotingConfig};
use movieclub_core::{
    JobScheduler, NoOpChat, PollChoice, ScheduleService, StartVotingInput, StartedVoting,
    VoteService, VotingService,
};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::{movie, voting::VotingKind};
use movieclub_db::repositories::{MovieRepository, VoteRepository};
use movieclub_db::test_utils::sqlite_memory;
use movieclub_queue::MemoryTaskQueue;
use movieclub_server::webhook::SECRET_HEADER;
use movieclub_server::{WebhookState, router};
use sea_orm::Set;
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "hunter2";

struct TestApp {
    uow: UnitOfWork,
    router: Router,
    started: StartedVoting,
}

/// A router over a fresh database holding one open selection poll.
async fn test_app() -> TestApp {
    let uow = UnitOfWork::new(Arc::new(sqlite_memory().await.unwrap()));
    let queue = Arc::new(MemoryTaskQueue::new());
    let schedule = ScheduleService::new(uow.clone(), ScheduleConfig::default());
    let voting = VotingService::new(
        uow.clone(),
        schedule,
        Arc::new(NoOpChat::default()),
        JobScheduler::new(queue),
        VotingConfig::default(),
    );

    for (id, title) in [(1, "Heat"), (2, "Ronin")] {
        MovieRepository::new()
            .create(
                uow.connection(),
                movie::ActiveModel {
                    id: Set(id),
                    title: Set(title.to_string()),
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

    let now = Utc::now();
    let started = voting
        .start_voting(
            StartVotingInput {
                title: "Pick one".to_string(),
                kind: VotingKind::Selection,
                created_by: 1,
                chat_id: -1,
                deadline: now.timestamp() + 600,
                movie_id: None,
                session_id: None,
                options: vec![
                    PollChoice {
                        movie_id: 1,
                        label: "Heat".to_string(),
                    },
                    PollChoice {
                        movie_id: 2,
                        label: "Ronin".to_string(),
                    },
                ],
            },
            now,
        )
        .await
        .unwrap();

    let state = WebhookState::new(VoteService::new(uow.clone()), Some(SECRET.to_string()));
    TestApp {
        uow,
        router: router(state),
        started,
    }
}

fn update(body: String, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/telegram/webhook")
        .method("POST")
        .header("Content-Type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    builder.body(Body::from(body)).unwrap()
}

fn poll_answer(poll_id: &str, option_ids: &str) -> String {
    format!(
        r#"{{"update_id": 1, "poll_answer": {{"poll_id": "{poll_id}", "user": {{"id": 501, "is_bot": false, "first_name": "Ann"}}, "option_ids": {option_ids}}}}}"#
    )
}

impl TestApp {
    async fn votes(&self) -> u64 {
        VoteRepository::new()
            .count_by_voting(self.uow.connection(), self.started.voting.id)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_rejects_missing_or_wrong_secret() {
    let app = test_app().await;
    let body = poll_answer(&app.started.poll.external_poll_id, "[0]");

    let response = app
        .router
        .clone()
        .oneshot(update(body.clone(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(update(body, Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.votes().await, 0);
}

#[tokio::test]
async fn test_poll_answer_records_vote() {
    let app = test_app().await;
    let body = poll_answer(&app.started.poll.external_poll_id, "[1]");

    let response = app
        .router
        .clone()
        .oneshot(update(body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.votes().await, 1);

    // Retracting removes it again
    let body = poll_answer(&app.started.poll.external_poll_id, "[]");
    let response = app
        .router
        .clone()
        .oneshot(update(body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.votes().await, 0);
}

#[tokio::test]
async fn test_invalid_answer_is_acknowledged() {
    let app = test_app().await;
    let body = poll_answer(&app.started.poll.external_poll_id, "[7]");

    let response = app
        .router
        .clone()
        .oneshot(update(body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.votes().await, 0);
}

#[tokio::test]
async fn test_other_updates_are_ignored() {
    let app = test_app().await;
    let body = r#"{"update_id": 2, "message": {"message_id": 3, "text": "/start"}}"#.to_string();

    let response = app
        .router
        .clone()
        .oneshot(update(body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = poll_answer("unknown-poll", "[0]");
    let response = app
        .router
        .clone()
        .oneshot(update(body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
