//! asynq server that runs the job processor.

use crate::gateway::{connection, queue_error};
use asynq::config::ServerConfig;
use asynq::server::{Server, ServerBuilder};
use movieclub_common::AppResult;
use movieclub_common::config::{RedisConfig, WorkerConfig};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);
const MIN_JANITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Server settings for the configured queue.
#[must_use]
pub fn server_config(redis: &RedisConfig, worker: &WorkerConfig) -> ServerConfig {
    let check_interval = worker.poll_interval().max(MIN_CHECK_INTERVAL);
    let queues = HashMap::from([(redis.queue.clone(), 1)]);

    ServerConfig::new()
        .concurrency(worker.concurrency.max(1))
        .queues(queues)
        .task_check_interval(check_interval)
        .delayed_task_check_interval(check_interval)
        .janitor_interval(worker.recover_interval().max(MIN_JANITOR_INTERVAL))
        .shutdown_timeout(worker.shutdown_timeout())
}

/// Build the worker server. Run it with [`Server::run`] and a
/// [`JobProcessor`](crate::JobProcessor).
pub async fn build_server(redis: &RedisConfig, worker: &WorkerConfig) -> AppResult<Server> {
    let server = ServerBuilder::new()
        .redis_config(connection(redis)?)
        .server_config(server_config(redis, worker))
        .build()
        .await
        .map_err(queue_error)?;

    info!(
        queue = %redis.queue,
        concurrency = worker.concurrency,
        "Worker server built"
    );
    Ok(server)
}
