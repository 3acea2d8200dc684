//! Telegram Bot API client.

use async_trait::async_trait;
use movieclub_common::config::TelegramConfig;
use movieclub_common::{AppError, AppResult};
use movieclub_core::{ChatPlatform, SentPoll};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Envelope of every Bot API reply.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollMessage {
    message_id: i32,
    poll: Option<PollRef>,
}

#[derive(Debug, Deserialize)]
struct PollRef {
    id: String,
}

/// [`ChatPlatform`] over the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramChat {
    client: Client,
    base_url: String,
}

impl TelegramChat {
    /// Create a client bound to the configured bot.
    pub fn new(config: &TelegramConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, body: &Value) -> AppResult<T> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("telegram {method}"))
                } else {
                    AppError::ExternalService(format!("telegram {method}: {e}"))
                }
            })?;

        let status = response.status();
        let reply: ApiResponse<T> = response.json().await.map_err(|e| {
            AppError::ExternalService(format!("telegram {method}: unreadable reply ({status}): {e}"))
        })?;

        unwrap_reply(method, status, reply)
    }
}

fn unwrap_reply<T>(method: &str, status: StatusCode, reply: ApiResponse<T>) -> AppResult<T> {
    if reply.ok {
        return reply
            .result
            .ok_or_else(|| AppError::ExternalService(format!("telegram {method}: empty result")));
    }

    let code = reply.error_code.unwrap_or_else(|| status.as_u16());
    let description = reply.description.unwrap_or_default();
    Err(api_error(method, code, &description))
}

/// Rate limits and server faults are worth retrying; other rejections are final.
fn api_error(method: &str, code: u16, description: &str) -> AppError {
    let message = format!("telegram {method} failed ({code}): {description}");
    match code {
        429 | 500.. => AppError::ExternalService(message),
        _ => AppError::BadRequest(message),
    }
}

#[async_trait]
impl ChatPlatform for TelegramChat {
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
    ) -> AppResult<SentPoll> {
        let options: Vec<Value> = options.iter().map(|text| json!({ "text": text })).collect();
        let message: PollMessage = self
            .call(
                "sendPoll",
                &json!({
                    "chat_id": chat_id,
                    "question": question,
                    "options": options,
                    "is_anonymous": false,
                }),
            )
            .await?;

        let poll = message.poll.ok_or_else(|| {
            AppError::ExternalService("telegram sendPoll: reply carries no poll".to_string())
        })?;

        debug!(chat_id, message_id = message.message_id, poll_id = %poll.id, "Poll sent");
        Ok(SentPoll {
            poll_id: poll.id,
            message_id: message.message_id,
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> AppResult<()> {
        let deleted: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        if !deleted {
            warn!(chat_id, message_id, "Telegram refused to delete message");
        }
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        let _: Value = self
            .call("sendMessage", &json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_send_poll_reply() {
        let reply: ApiResponse<PollMessage> = serde_json::from_str(
            r#"{
                "ok": true,
                "result": {
                    "message_id": 77,
                    "chat": {"id": -100, "type": "supergroup"},
                    "date": 1700000000,
                    "poll": {"id": "5312", "question": "Next?", "options": []}
                }
            }"#,
        )
        .unwrap();

        let message = unwrap_reply("sendPoll", StatusCode::OK, reply).unwrap();
        assert_eq!(message.message_id, 77);
        assert_eq!(message.poll.unwrap().id, "5312");
    }

    #[test]
    fn test_error_reply_classification() {
        let reply: ApiResponse<bool> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: message to delete not found"}"#,
        )
        .unwrap();
        let err = unwrap_reply("deleteMessage", StatusCode::BAD_REQUEST, reply).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(!err.is_retryable());

        let reply: ApiResponse<bool> = serde_json::from_str(
            r#"{"ok": false, "error_code": 429, "description": "Too Many Requests: retry after 3"}"#,
        )
        .unwrap();
        let err = unwrap_reply("sendMessage", StatusCode::TOO_MANY_REQUESTS, reply).unwrap_err();
        assert!(err.is_retryable());

        assert!(api_error("sendPoll", 502, "Bad Gateway").is_retryable());
    }

    #[test]
    fn test_base_url() {
        let chat = TelegramChat::new(&TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: -1,
            api_url: "https://api.telegram.org/".to_string(),
            webhook_secret: None,
            request_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(chat.base_url, "https://api.telegram.org/bot123:abc");
    }
}
