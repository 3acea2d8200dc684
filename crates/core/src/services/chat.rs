//! Chat platform port.
//!
//! Provides an abstraction over the chat platform the club lives in.
//! The Telegram implementation is provided by the server crate.

use async_trait::async_trait;
use movieclub_common::AppResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifiers the platform assigned to a posted poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentPoll {
    /// Platform poll id, used to correlate incoming answers.
    pub poll_id: String,
    /// Id of the message carrying the poll.
    pub message_id: i32,
}

/// A user answered (or retracted an answer to) a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAnswerEvent {
    /// Platform poll id.
    pub poll_id: String,
    /// Platform user id.
    pub user_id: i64,
    /// Chosen option indexes, empty when the answer was retracted.
    pub option_ids: Vec<i32>,
}

/// Trait for talking to the chat platform.
///
/// Implementations must bound every call with a timeout.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a non-anonymous poll.
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
    ) -> AppResult<SentPoll>;

    /// Delete a message.
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> AppResult<()>;

    /// Post a plain text message.
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()>;
}

/// Type alias for a shared chat platform.
pub type ChatService = Arc<dyn ChatPlatform>;

/// A no-op implementation of [`ChatPlatform`] for dry runs.
///
/// Polls get synthetic ids derived from a counter, so votings can be started without a chat.
#[derive(Debug, Default)]
pub struct NoOpChat {
    counter: std::sync::atomic::AtomicI32,
}

#[async_trait]
impl ChatPlatform for NoOpChat {
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        _options: &[String],
    ) -> AppResult<SentPoll> {
        let message_id = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        tracing::debug!(chat_id, question, message_id, "NoOp: would send poll");
        Ok(SentPoll {
            poll_id: format!("noop-{message_id}"),
            message_id,
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> AppResult<()> {
        tracing::debug!(chat_id, message_id, "NoOp: would delete message");
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        tracing::debug!(chat_id, text, "NoOp: would send message");
        Ok(())
    }
}
