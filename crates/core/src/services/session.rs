//! Session service.
//!
//! There is at most one `ONGOING` session. It is created lazily when the first movie of a
//! cycle is added and ends either by its finish job or by cancellation.

use crate::services::jobs::{
    DEADLINE_TOLERANCE_SECS, FinishSessionPayload, Job, JobId, JobOutcome, JobScheduler,
    MovieRef, OpenRatingVotingPayload,
};
use crate::services::schedule::ScheduleService;
use crate::services::voting::{CancelOutcome, VotingService};
use chrono::{DateTime, Utc};
use movieclub_common::{AppError, AppResult};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::{
    movie,
    session::{self, SessionStatus},
    voting,
};
use movieclub_db::repositories::{MovieRepository, SessionRepository, VotingRepository};
use sea_orm::ConnectionTrait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Longest session description accepted.
pub const MAX_DESCRIPTION_LEN: usize = 2048;

/// The ongoing session with its movies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OngoingSession {
    pub session: session::Model,
    pub movie_ids: Vec<i64>,
}

/// Result of adding movies to the ongoing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedMovies {
    pub session: session::Model,
    /// Whether the session was created by this call.
    pub created: bool,
    /// Movies attached by this call, in request order.
    pub new_movie_ids: Vec<i64>,
}

/// Result of removing movies from the ongoing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedMovies {
    pub session_id: i32,
    pub removed: u64,
}

/// A cancelled session and what happened to its votings.
#[derive(Debug)]
pub struct CancelledSession {
    pub session: session::Model,
    pub votings: Vec<voting::Model>,
    pub cancelled_votings: Vec<(i32, AppResult<CancelOutcome>)>,
}

/// Result of finishing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The session is finished and its movies marked watched.
    Finished { watched: u64 },
    /// The session had already been finished or cancelled.
    AlreadyTerminal(SessionStatus),
    /// The session deadline has not been reached yet.
    NotDue { until: i64 },
}

/// Jobs restored by [`SessionService::reconcile_jobs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub close_jobs: usize,
    pub finish_jobs: usize,
    pub rating_jobs: usize,
}

/// Session service.
#[derive(Clone)]
pub struct SessionService {
    uow: UnitOfWork,
    session_repo: SessionRepository,
    movie_repo: MovieRepository,
    voting_repo: VotingRepository,
    schedule: ScheduleService,
    voting: VotingService,
    jobs: JobScheduler,
}

impl SessionService {
    /// Create a new session service.
    #[must_use]
    pub const fn new(
        uow: UnitOfWork,
        schedule: ScheduleService,
        voting: VotingService,
        jobs: JobScheduler,
    ) -> Self {
        Self {
            uow,
            session_repo: SessionRepository::new(),
            movie_repo: MovieRepository::new(),
            voting_repo: VotingRepository::new(),
            schedule,
            voting,
            jobs,
        }
    }

    /// Return the ongoing session, creating it with `deadline` if there is none.
    pub async fn find_or_create_session(
        &self,
        created_by: i64,
        deadline: i64,
    ) -> AppResult<(session::Model, bool)> {
        let txn = self.uow.begin().await?;
        let result = self
            .session_repo
            .find_or_create_ongoing(&txn, created_by, deadline)
            .await?;
        UnitOfWork::commit(txn).await?;
        Ok(result)
    }

    /// The ongoing session with its movie ids, if any.
    pub async fn find_ongoing_session(&self) -> AppResult<Option<OngoingSession>> {
        let conn = self.uow.connection();
        let Some(session) = self.session_repo.find_ongoing(conn).await? else {
            return Ok(None);
        };
        let movie_ids = self.session_repo.movie_ids(conn, session.id).await?;
        Ok(Some(OngoingSession { session, movie_ids }))
    }

    /// Attach movies to the ongoing session, creating it at the next scheduled slot.
    ///
    /// Duplicate, unknown and already attached movies are skipped. One open rating voting
    /// job is scheduled per newly attached movie, and a finish job when the session is new.
    pub async fn add_movies_to_session(
        &self,
        created_by: i64,
        chat_id: i64,
        movie_ids: &[i64],
        now: DateTime<Utc>,
    ) -> AppResult<AddedMovies> {
        if movie_ids.is_empty() {
            return Err(AppError::Validation("No movies to add".to_string()));
        }

        let mut seen = HashSet::new();
        let requested: Vec<i64> = movie_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let txn = self.uow.begin().await?;

        let movies = self.movie_repo.find_by_ids(&txn, &requested).await?;
        let known: HashSet<i64> = movies.iter().map(|m| m.id).collect();
        let unknown: Vec<i64> = requested
            .iter()
            .copied()
            .filter(|id| !known.contains(id))
            .collect();
        if !unknown.is_empty() {
            warn!(?unknown, "Skipping unknown movies");
        }
        if known.is_empty() {
            return Err(AppError::NotFound(format!("Movies not found: {unknown:?}")));
        }

        let deadline = self.schedule.next_deadline(&txn, now).await?;
        let (session, created) = self
            .session_repo
            .find_or_create_ongoing(&txn, created_by, deadline)
            .await?;

        let attached: HashSet<i64> = self
            .session_repo
            .movie_ids(&txn, session.id)
            .await?
            .into_iter()
            .collect();
        let new_movie_ids: Vec<i64> = requested
            .into_iter()
            .filter(|id| known.contains(id) && !attached.contains(id))
            .collect();

        self.session_repo
            .attach_movies(&txn, session.id, &new_movie_ids)
            .await?;
        UnitOfWork::commit(txn).await?;

        info!(
            session_id = session.id,
            created,
            ?new_movie_ids,
            "Movies added to session"
        );

        let now_ts = now.timestamp();
        if created {
            self.jobs
                .schedule_once_logged(
                    finish_job(session.id),
                    session.finished_at,
                    now_ts,
                )
                .await;
        }
        for movie in movies.iter().filter(|m| new_movie_ids.contains(&m.id)) {
            self.jobs
                .schedule_once_logged(
                    open_rating_job(&session, movie, chat_id),
                    session.finished_at,
                    now_ts,
                )
                .await;
        }

        Ok(AddedMovies {
            session,
            created,
            new_movie_ids,
        })
    }

    /// Detach movies from the ongoing session.
    ///
    /// Active rating votings of the removed movies are cancelled and their pending open
    /// rating voting jobs deleted.
    pub async fn remove_movies_from_session(&self, movie_ids: &[i64]) -> AppResult<RemovedMovies> {
        let txn = self.uow.begin().await?;

        let session = self
            .session_repo
            .find_ongoing_for_update(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("No ongoing session".to_string()))?;

        let ratings = self
            .voting_repo
            .find_active_ratings_for_movies(&txn, session.id, movie_ids)
            .await?;
        let removed = self
            .session_repo
            .detach_movies(&txn, session.id, movie_ids)
            .await?;
        UnitOfWork::commit(txn).await?;

        let voting_ids: Vec<i32> = ratings.iter().map(|v| v.id).collect();
        self.voting.cancel_by_voting_ids(&voting_ids).await;
        for &movie_id in movie_ids {
            self.jobs
                .cancel_logged(&JobId::open_rating_voting(session.id, movie_id))
                .await;
        }

        info!(session_id = session.id, removed, "Movies removed from session");
        Ok(RemovedMovies {
            session_id: session.id,
            removed,
        })
    }

    /// Replace the description of the ongoing session.
    pub async fn update_session_description(
        &self,
        description: Option<String>,
    ) -> AppResult<session::Model> {
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(AppError::Validation(format!(
                "Description is longer than {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        let txn = self.uow.begin().await?;
        let mut session = self
            .session_repo
            .find_ongoing_for_update(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("No ongoing session".to_string()))?;
        self.session_repo
            .update_description(&txn, session.id, description.clone())
            .await?;
        UnitOfWork::commit(txn).await?;

        session.description = description;
        info!(session_id = session.id, "Session description updated");
        Ok(session)
    }

    /// Finish a session and mark its movies watched.
    ///
    /// Finishing a terminal session is a no-op. A session whose deadline is still ahead
    /// of `now` is left untouched.
    pub async fn finish_session(
        &self,
        session_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<FinishOutcome> {
        let txn = self.uow.begin().await?;

        let session = self
            .session_repo
            .find_by_id_for_update(&txn, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {session_id}")))?;

        if session.status.is_terminal() {
            return Ok(FinishOutcome::AlreadyTerminal(session.status));
        }
        if session.finished_at > now.timestamp() + DEADLINE_TOLERANCE_SECS {
            return Ok(FinishOutcome::NotDue {
                until: session.finished_at,
            });
        }

        self.session_repo
            .update_status(&txn, session_id, SessionStatus::Finished)
            .await?;
        let movie_ids = self.session_repo.movie_ids(&txn, session_id).await?;
        let watched = self
            .movie_repo
            .mark_watched(&txn, &movie_ids, session.finished_at)
            .await?;
        UnitOfWork::commit(txn).await?;

        info!(session_id, watched, "Session finished");
        Ok(FinishOutcome::Finished { watched })
    }

    /// Handle a fired finish session job.
    pub async fn finish_session_job(
        &self,
        payload: &FinishSessionPayload,
        now: DateTime<Utc>,
    ) -> AppResult<JobOutcome> {
        match self.finish_session(payload.session_id, now).await {
            Ok(FinishOutcome::NotDue { until }) => {
                debug!(session_id = payload.session_id, until, "Session moved, deferring finish");
                Ok(JobOutcome::Deferred { until })
            }
            Ok(FinishOutcome::AlreadyTerminal(status)) => {
                debug!(session_id = payload.session_id, ?status, "Session already terminal");
                Ok(JobOutcome::Done)
            }
            Ok(FinishOutcome::Finished { .. }) => Ok(JobOutcome::Done),
            Err(AppError::NotFound(msg)) => {
                warn!(session_id = payload.session_id, %msg, "Session of finish job not found");
                Ok(JobOutcome::Done)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel the ongoing session. Returns `None` when there is none.
    ///
    /// After the commit, open votings of the session are cancelled and the finish and open
    /// rating voting jobs deleted.
    pub async fn cancel_session(&self) -> AppResult<Option<CancelledSession>> {
        let txn = self.uow.begin().await?;

        let Some(mut session) = self.session_repo.find_ongoing_for_update(&txn).await? else {
            debug!("No ongoing session to cancel");
            return Ok(None);
        };

        self.session_repo
            .update_status(&txn, session.id, SessionStatus::Cancelled)
            .await?;
        let votings = self.voting_repo.find_by_session(&txn, session.id).await?;
        let movie_ids = self.session_repo.movie_ids(&txn, session.id).await?;
        UnitOfWork::commit(txn).await?;
        session.status = SessionStatus::Cancelled;

        let open: Vec<i32> = votings
            .iter()
            .filter(|v| !v.status.is_terminal())
            .map(|v| v.id)
            .collect();
        let cancelled_votings = self.voting.cancel_by_voting_ids(&open).await;

        self.jobs
            .cancel_logged(&JobId::finish_session(session.id))
            .await;
        for movie_id in movie_ids {
            self.jobs
                .cancel_logged(&JobId::open_rating_voting(session.id, movie_id))
                .await;
        }

        info!(
            session_id = session.id,
            votings = open.len(),
            "Session cancelled"
        );
        Ok(Some(CancelledSession {
            session,
            votings,
            cancelled_votings,
        }))
    }

    /// Move the deadline of the ongoing session and its jobs.
    ///
    /// The database is updated first. If the process dies before the jobs are moved, the
    /// old jobs defer themselves when they fire early, and [`SessionService::reconcile_jobs`]
    /// moves jobs that would fire late.
    pub async fn reschedule_session(
        &self,
        session_id: i32,
        new_deadline: i64,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<session::Model> {
        let now_ts = now.timestamp();
        if new_deadline <= now_ts {
            return Err(AppError::Validation(
                "Session deadline must be in the future".to_string(),
            ));
        }

        let txn = self.uow.begin().await?;

        let mut session = self
            .session_repo
            .find_by_id_for_update(&txn, session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session not found: {session_id}")))?;
        if session.status != SessionStatus::Ongoing {
            return Err(AppError::Conflict(format!(
                "Session {session_id} is {:?}, not ongoing",
                session.status
            )));
        }

        self.session_repo
            .update_finished_at(&txn, session_id, new_deadline)
            .await?;
        let pending = self.movies_awaiting_rating(&txn, session_id).await?;
        UnitOfWork::commit(txn).await?;
        session.finished_at = new_deadline;

        if let Err(e) = self
            .jobs
            .reschedule(finish_job(session_id), new_deadline, now_ts)
            .await
        {
            warn!(session_id, error = %e, "Failed to reschedule finish job");
        }
        for movie in &pending {
            if let Err(e) = self
                .jobs
                .reschedule(open_rating_job(&session, movie, chat_id), new_deadline, now_ts)
                .await
            {
                warn!(session_id, movie_id = movie.id, error = %e, "Failed to reschedule rating job");
            }
        }

        info!(session_id, new_deadline, "Session rescheduled");
        Ok(session)
    }

    /// Restore the jobs the database state calls for.
    ///
    /// Close jobs of active votings, the finish job of the ongoing session and the open
    /// rating voting jobs of its unrated movies are enqueued if missing, or moved if they
    /// wait for a stale deadline.
    pub async fn reconcile_jobs(
        &self,
        chat_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<ReconcileReport> {
        let mut report = ReconcileReport {
            close_jobs: self.voting.reconcile_close_jobs(now).await?,
            ..ReconcileReport::default()
        };

        let conn = self.uow.connection();
        let Some(session) = self.session_repo.find_ongoing(conn).await? else {
            info!(?report, "Reconciled jobs");
            return Ok(report);
        };

        let now_ts = now.timestamp();
        if self
            .jobs
            .ensure_scheduled(finish_job(session.id), session.finished_at, now_ts)
            .await?
        {
            report.finish_jobs += 1;
        }

        for movie in self.movies_awaiting_rating(conn, session.id).await? {
            if self
                .jobs
                .ensure_scheduled(
                    open_rating_job(&session, &movie, chat_id),
                    session.finished_at,
                    now_ts,
                )
                .await?
            {
                report.rating_jobs += 1;
            }
        }

        info!(session_id = session.id, ?report, "Reconciled jobs");
        Ok(report)
    }

    /// Movies of a session without a (non-cancelled) rating voting.
    async fn movies_awaiting_rating<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: i32,
    ) -> AppResult<Vec<movie::Model>> {
        let movie_ids = self.session_repo.movie_ids(conn, session_id).await?;
        let mut pending = Vec::with_capacity(movie_ids.len());

        for movie in self.movie_repo.find_by_ids(conn, &movie_ids).await? {
            if self
                .voting_repo
                .find_rating_for_session_movie(conn, session_id, movie.id)
                .await?
                .is_none()
            {
                pending.push(movie);
            }
        }

        Ok(pending)
    }
}

const fn finish_job(session_id: i32) -> Job {
    Job::FinishSession(FinishSessionPayload { session_id })
}

fn open_rating_job(session: &session::Model, movie: &movie::Model, chat_id: i64) -> Job {
    Job::OpenRatingVoting(OpenRatingVotingPayload {
        chat_id,
        session_id: session.id,
        movie: MovieRef {
            id: movie.id,
            title: movie.title.clone(),
        },
        user_id: session.created_by,
    })
}
