//! Telegram adapter and webhook for movieclub.

pub mod telegram;
pub mod webhook;

pub use telegram::TelegramChat;
pub use webhook::{WebhookState, router};
