//! Inbound Telegram updates.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use movieclub_common::{AppError, AppResult};
use movieclub_core::{PollAnswerEvent, VoteService};
use serde::Deserialize;
use tracing::{debug, warn};

/// Header carrying the secret registered with `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Subset of a Telegram `Update` the club reacts to.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub poll_answer: Option<PollAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct PollAnswer {
    pub poll_id: String,
    /// Absent when a chat answered anonymously.
    #[serde(default)]
    pub user: Option<User>,
    pub option_ids: Vec<i32>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

/// State of the webhook route.
#[derive(Clone)]
pub struct WebhookState {
    votes: VoteService,
    secret: Option<String>,
}

impl WebhookState {
    /// Create webhook state; without a secret every request is accepted.
    #[must_use]
    pub const fn new(votes: VoteService, secret: Option<String>) -> Self {
        Self { votes, secret }
    }
}

/// Router serving `POST /telegram/webhook`.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}

async fn telegram_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> AppResult<StatusCode> {
    if let Some(secret) = &state.secret {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            warn!(update_id = update.update_id, "Webhook call with a bad secret");
            return Err(AppError::Unauthorized);
        }
    }

    let Some(answer) = update.poll_answer else {
        debug!(update_id = update.update_id, "Ignoring update");
        return Ok(StatusCode::OK);
    };
    let Some(user) = answer.user else {
        debug!(poll_id = %answer.poll_id, "Ignoring anonymous poll answer");
        return Ok(StatusCode::OK);
    };

    let event = PollAnswerEvent {
        poll_id: answer.poll_id,
        user_id: user.id,
        option_ids: answer.option_ids,
    };

    // Telegram redelivers on any non-2xx reply, so only transient failures are surfaced.
    match state.votes.record_answer(event).await {
        Ok(outcome) => {
            debug!(update_id = update.update_id, ?outcome, "Poll answer handled");
            Ok(StatusCode::OK)
        }
        Err(e) if !e.is_retryable() => {
            warn!(update_id = update.update_id, error = %e, "Rejected poll answer");
            Ok(StatusCode::OK)
        }
        Err(e) => Err(e),
    }
}
