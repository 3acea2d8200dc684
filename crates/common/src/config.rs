//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Webhook server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Telegram Bot API configuration.
    pub telegram: TelegramConfig,
    /// Deferred job worker configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Voting configuration.
    #[serde(default)]
    pub voting: VotingConfig,
    /// Fallback session schedule, used while no schedule row is active.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Webhook server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Timeout for establishing a connection, in seconds.
    #[serde(default = "default_db_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Timeout for acquiring a pooled connection, in seconds.
    #[serde(default = "default_db_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Name of the task queue the jobs are enqueued on.
    #[serde(default = "default_redis_queue")]
    pub queue: String,
    /// Upper bound for a single queue operation, in milliseconds.
    #[serde(default = "default_redis_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by `BotFather`.
    pub bot_token: String,
    /// Group chat the club lives in.
    pub chat_id: i64,
    /// Bot API base URL.
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Secret expected in the `X-Telegram-Bot-Api-Secret-Token` header.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Timeout for a single Bot API request, in seconds.
    #[serde(default = "default_telegram_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Deferred job worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of jobs processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Delay between checks for ready and due tasks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How many times a failed job is redelivered before it is archived.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Interval between janitor sweeps, in seconds.
    ///
    /// The janitor also moves tasks of crashed workers back to the queue.
    #[serde(default = "default_recover_interval_secs")]
    pub recover_interval_secs: u64,
    /// Upper bound for a single handler run, in seconds.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// How long shutdown waits for running jobs, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Voting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// How long a rating poll stays open, in minutes.
    #[serde(default = "default_rating_duration_mins")]
    pub rating_duration_mins: u64,
}

/// Recurring session rule used when no schedule has been configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Day of week (0=Sunday, 6=Saturday).
    #[serde(default = "default_weekday")]
    pub weekday: i16,
    /// Hour of day in the schedule's timezone.
    #[serde(default = "default_hour")]
    pub hour: i16,
    /// Minute of hour.
    #[serde(default = "default_minute")]
    pub minute: i16,
    /// IANA timezone name.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_db_timeout_secs() -> u64 {
    10
}

fn default_redis_queue() -> String {
    "movieclub".to_string()
}

const fn default_redis_operation_timeout_ms() -> u64 {
    5000
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

const fn default_telegram_timeout_secs() -> u64 {
    10
}

const fn default_concurrency() -> usize {
    10
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_max_retry() -> u32 {
    1
}

const fn default_shutdown_timeout_secs() -> u64 {
    10
}

const fn default_recover_interval_secs() -> u64 {
    60
}

const fn default_handler_timeout_secs() -> u64 {
    120
}

const fn default_rating_duration_mins() -> u64 {
    15
}

const fn default_weekday() -> i16 {
    4
}

const fn default_hour() -> i16 {
    21
}

const fn default_minute() -> i16 {
    30
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retry: default_max_retry(),
            recover_interval_secs: default_recover_interval_secs(),
            handler_timeout_secs: default_handler_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl WorkerConfig {
    /// Delay between checks for ready and due tasks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Upper bound for a single handler run.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    /// Period of the janitor sweep.
    #[must_use]
    pub const fn recover_interval(&self) -> Duration {
        Duration::from_secs(self.recover_interval_secs)
    }

    /// Grace period for running jobs on shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            rating_duration_mins: default_rating_duration_mins(),
        }
    }
}

impl VotingConfig {
    /// How long a rating poll stays open.
    #[must_use]
    pub const fn rating_duration(&self) -> Duration {
        Duration::from_secs(self.rating_duration_mins * 60)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            weekday: default_weekday(),
            hour: default_hour(),
            minute: default_minute(),
            timezone: default_timezone(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `MOVIECLUB_ENV`)
    /// 4. Environment variables with `MOVIECLUB_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("MOVIECLUB_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("MOVIECLUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MOVIECLUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
