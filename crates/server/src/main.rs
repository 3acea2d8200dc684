//! Movieclub bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use movieclub_common::Config;
use movieclub_common::config::{LogFormat, LoggingConfig};
use movieclub_core::{
    ChatService, JobScheduler, ScheduleService, SessionService, TaskQueue, VoteService,
    VotingService,
};
use movieclub_db::UnitOfWork;
use movieclub_queue::{AsynqTaskQueue, JobProcessor, build_server};
use movieclub_server::{TelegramChat, WebhookState, router};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "movieclub=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.logging);

    info!("Starting movieclub...");

    // Database
    let db = movieclub_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    movieclub_db::migrate(&db).await?;
    info!("Migrations completed");

    let uow = UnitOfWork::new(Arc::new(db));

    // Job queue
    let queue: TaskQueue =
        Arc::new(AsynqTaskQueue::connect(&config.redis, &config.worker).await?);
    let jobs = JobScheduler::new(queue.clone());

    // Services
    let chat: ChatService = Arc::new(TelegramChat::new(&config.telegram)?);
    let schedule = ScheduleService::new(uow.clone(), config.schedule.clone());
    let voting = VotingService::new(
        uow.clone(),
        schedule.clone(),
        chat,
        jobs.clone(),
        config.voting.clone(),
    );
    let sessions = SessionService::new(uow.clone(), schedule, voting.clone(), jobs);

    // Restore jobs lost between a commit and its enqueue
    match sessions
        .reconcile_jobs(config.telegram.chat_id, Utc::now())
        .await
    {
        Ok(report) => info!(
            close_jobs = report.close_jobs,
            finish_jobs = report.finish_jobs,
            rating_jobs = report.rating_jobs,
            "Jobs reconciled"
        ),
        Err(e) => warn!(error = %e, "Failed to reconcile jobs"),
    }

    // Workers
    let processor = JobProcessor::new(voting, sessions, queue);
    let mut worker = build_server(&config.redis, &config.worker).await?;
    let mut workers = tokio::spawn(async move {
        if let Err(e) = worker.run(processor).await {
            error!(error = %e, "Job worker server failed");
        }
    });
    info!(concurrency = config.worker.concurrency, "Job workers started");

    // Webhook
    let app = router(WebhookState::new(
        VoteService::new(uow),
        config.telegram.webhook_secret.clone(),
    ))
    .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The worker server stops on SIGINT by itself; give it the grace period, then stop it.
    info!("Webhook server stopped, draining job workers...");
    let grace = config.worker.shutdown_timeout() + Duration::from_secs(1);
    if tokio::time::timeout(grace, &mut workers).await.is_err() {
        warn!("Job workers did not stop in time, aborting");
        workers.abort();
    }

    info!("Shutdown complete");
    Ok(())
}
