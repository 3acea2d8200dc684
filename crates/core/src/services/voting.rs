//! Voting service: starting, closing and cancelling votings.
//!
//! A voting is `ACTIVE` until its close job fires or it is cancelled. Both paths lock the
//! voting row and re-check the status, so duplicate job deliveries and races between the
//! close job and a cancellation resolve to a single transition.

use crate::services::chat::ChatService;
use crate::services::jobs::{
    CloseVotingPayload, DEADLINE_TOLERANCE_SECS, FinishSessionPayload, Job, JobId, JobOutcome,
    JobScheduler, MovieRef, OpenRatingVotingPayload,
};
use crate::services::schedule::ScheduleService;
use crate::services::tally::TallyService;
use chrono::{DateTime, Utc};
use movieclub_common::config::VotingConfig;
use movieclub_common::{AppError, AppResult};
use movieclub_db::UnitOfWork;
use movieclub_db::entities::{
    poll::{self, PollStatus},
    session::{self, SessionStatus},
    voting::{self, VotingKind, VotingStatus},
};
use movieclub_db::repositories::{
    MovieRepository, PollRepository, SessionRepository, VotingRepository,
};
use sea_orm::{ConnectionTrait, Set, TransactionTrait};
use tracing::{debug, info, warn};
use validator::Validate;

/// Most options a chat poll can carry.
pub const MAX_POLL_OPTIONS: usize = 10;

/// A movie offered in a selection poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollChoice {
    pub movie_id: i64,
    /// Text shown for the option.
    pub label: String,
}

/// Longest voting title, in characters.
pub const TITLE_MAX_CHARS: usize = 255;

/// Input for starting a voting.
#[derive(Debug, Clone, Validate)]
pub struct StartVotingInput {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub kind: VotingKind,
    pub created_by: i64,
    pub chat_id: i64,
    /// Unix time the voting closes.
    pub deadline: i64,
    /// Rated movie, required for rating votings.
    pub movie_id: Option<i64>,
    pub session_id: Option<i32>,
    /// Selection options in poll order. Rating votings always offer 1 to 10.
    pub options: Vec<PollChoice>,
}

/// A voting together with its poll.
#[derive(Debug, Clone)]
pub struct StartedVoting {
    pub voting: voting::Model,
    pub poll: poll::Model,
}

/// Result of a state transition on a voting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    /// The transition was applied.
    Applied(T),
    /// The voting had already reached a terminal status; nothing changed.
    AlreadyTerminal(VotingStatus),
}

/// The session a selection winner was attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAttachment {
    pub session: session::Model,
    /// Whether the session was created by this call.
    pub created: bool,
}

/// Winner of a selection voting closed by its job.
#[derive(Debug, Clone)]
struct SelectionWinner {
    movie_id: i64,
    vote_count: i64,
    attachment: SessionAttachment,
}

/// Per-voting result of a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
    NotFound,
}

/// Voting service.
#[derive(Clone)]
pub struct VotingService {
    uow: UnitOfWork,
    voting_repo: VotingRepository,
    poll_repo: PollRepository,
    movie_repo: MovieRepository,
    session_repo: SessionRepository,
    tally: TallyService,
    schedule: ScheduleService,
    chat: ChatService,
    jobs: JobScheduler,
    config: VotingConfig,
}

impl VotingService {
    /// Create a new voting service.
    #[must_use]
    pub const fn new(
        uow: UnitOfWork,
        schedule: ScheduleService,
        chat: ChatService,
        jobs: JobScheduler,
        config: VotingConfig,
    ) -> Self {
        Self {
            uow,
            voting_repo: VotingRepository::new(),
            poll_repo: PollRepository::new(),
            movie_repo: MovieRepository::new(),
            session_repo: SessionRepository::new(),
            tally: TallyService::new(),
            schedule,
            chat,
            jobs,
            config,
        }
    }

    /// Start a voting: persist it, post its poll and schedule its close job.
    ///
    /// The voting row and the poll rows are written in one transaction around the chat
    /// call, so a failed poll post leaves nothing behind.
    pub async fn start_voting(
        &self,
        input: StartVotingInput,
        now: DateTime<Utc>,
    ) -> AppResult<StartedVoting> {
        input.validate()?;
        let now_ts = now.timestamp();

        if input.deadline <= now_ts {
            return Err(AppError::Validation(
                "Voting deadline must be in the future".to_string(),
            ));
        }

        let labels = match input.kind {
            VotingKind::Selection => {
                if !(2..=MAX_POLL_OPTIONS).contains(&input.options.len()) {
                    return Err(AppError::Validation(format!(
                        "A selection voting needs 2 to {MAX_POLL_OPTIONS} movies, got {}",
                        input.options.len()
                    )));
                }
                input.options.iter().map(|o| o.label.clone()).collect()
            }
            VotingKind::Rating => {
                if input.movie_id.is_none() {
                    return Err(AppError::Validation(
                        "A rating voting needs a movie".to_string(),
                    ));
                }
                rating_labels()
            }
        };

        let txn = self.uow.begin().await?;

        let voting = self
            .voting_repo
            .create(
                &txn,
                voting::ActiveModel {
                    title: Set(input.title.clone()),
                    kind: Set(input.kind),
                    status: Set(VotingStatus::Active),
                    created_by: Set(input.created_by),
                    finished_at: Set(input.deadline),
                    movie_id: Set(input.movie_id),
                    session_id: Set(input.session_id),
                    created_at: Set(now.fixed_offset()),
                    ..Default::default()
                },
            )
            .await?;

        // Dropping the transaction on error rolls the voting back
        let sent = self
            .chat
            .send_poll(input.chat_id, &input.title, &labels)
            .await?;

        let persisted = async {
            let poll = self
                .poll_repo
                .create(
                    &txn,
                    poll::ActiveModel {
                        external_poll_id: Set(sent.poll_id.clone()),
                        chat_id: Set(input.chat_id),
                        message_id: Set(sent.message_id),
                        voting_id: Set(voting.id),
                        kind: Set(input.kind),
                        status: Set(PollStatus::Opened),
                        movie_id: Set(input.movie_id),
                        ..Default::default()
                    },
                )
                .await?;

            if input.kind == VotingKind::Selection {
                let movie_ids: Vec<i64> = input.options.iter().map(|o| o.movie_id).collect();
                self.poll_repo.create_options(&txn, poll.id, &movie_ids).await?;
            }

            UnitOfWork::commit(txn).await?;
            Ok::<_, AppError>(poll)
        }
        .await;

        let poll = match persisted {
            Ok(poll) => poll,
            Err(e) => {
                self.delete_message_logged(input.chat_id, sent.message_id)
                    .await;
                return Err(e);
            }
        };

        info!(
            voting_id = voting.id,
            kind = ?voting.kind,
            poll_id = %poll.external_poll_id,
            deadline = voting.finished_at,
            "Voting started"
        );

        self.jobs
            .schedule_once_logged(
                Job::close_voting(voting.kind, close_payload(&voting, &poll)),
                voting.finished_at,
                now_ts,
            )
            .await;

        Ok(StartedVoting { voting, poll })
    }

    /// Close a rating voting and store the mean as the movie's rating.
    pub async fn finish_rating_voting(
        &self,
        voting_id: i32,
        movie_id: i64,
        mean: f64,
    ) -> AppResult<Transition<()>> {
        let txn = self.uow.begin().await?;

        let voting = self.lock_voting(&txn, voting_id).await?;
        if voting.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(voting.status));
        }

        self.apply_rating(&txn, voting_id, movie_id, mean).await?;
        UnitOfWork::commit(txn).await?;

        info!(voting_id, movie_id, mean, "Rating voting finished");
        Ok(Transition::Applied(()))
    }

    /// Close a selection voting and attach the winner to the ongoing session.
    ///
    /// Creates the session, with the next scheduled slot as its deadline, when there is
    /// none. The attachment reports whether it did so.
    pub async fn finish_selection_voting(
        &self,
        voting_id: i32,
        winning_movie_id: i64,
        actor: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Transition<SessionAttachment>> {
        let txn = self.uow.begin().await?;

        let voting = self.lock_voting(&txn, voting_id).await?;
        if voting.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(voting.status));
        }

        let attachment = self
            .apply_selection(&txn, voting_id, winning_movie_id, actor, now)
            .await?;
        UnitOfWork::commit(txn).await?;

        info!(
            voting_id,
            movie_id = winning_movie_id,
            session_id = attachment.session.id,
            created = attachment.created,
            "Selection voting finished"
        );
        Ok(Transition::Applied(attachment))
    }

    /// Close a voting that received no votes, without a result.
    pub async fn close_without_result(&self, voting_id: i32) -> AppResult<Transition<()>> {
        let txn = self.uow.begin().await?;

        let voting = self.lock_voting(&txn, voting_id).await?;
        if voting.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(voting.status));
        }

        self.mark_closed(&txn, voting_id).await?;
        UnitOfWork::commit(txn).await?;

        info!(voting_id, "Voting closed without votes");
        Ok(Transition::Applied(()))
    }

    /// Tally a selection voting under its row lock and apply the result.
    ///
    /// `None` means nobody voted and the voting closed without a result.
    async fn close_selection_tally(
        &self,
        voting_id: i32,
        actor: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Transition<Option<SelectionWinner>>> {
        let txn = self.uow.begin().await?;

        let voting = self.lock_voting(&txn, voting_id).await?;
        if voting.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(voting.status));
        }

        let Some(tally) = self.tally.max_selection_count(&txn, voting_id).await? else {
            self.mark_closed(&txn, voting_id).await?;
            UnitOfWork::commit(txn).await?;
            info!(voting_id, "Voting closed without votes");
            return Ok(Transition::Applied(None));
        };

        let attachment = self
            .apply_selection(&txn, voting_id, tally.movie_id, actor, now)
            .await?;
        UnitOfWork::commit(txn).await?;

        info!(
            voting_id,
            movie_id = tally.movie_id,
            votes = tally.vote_count,
            session_id = attachment.session.id,
            created = attachment.created,
            "Selection voting finished"
        );
        Ok(Transition::Applied(Some(SelectionWinner {
            movie_id: tally.movie_id,
            vote_count: tally.vote_count,
            attachment,
        })))
    }

    /// Tally a rating voting under its row lock and apply the mean.
    ///
    /// `None` means nobody rated and the movie's rating stays unset.
    async fn close_rating_tally(
        &self,
        voting_id: i32,
        movie_id: i64,
    ) -> AppResult<Transition<Option<f64>>> {
        let txn = self.uow.begin().await?;

        let voting = self.lock_voting(&txn, voting_id).await?;
        if voting.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(voting.status));
        }

        let mean = self.tally.rating_mean(&txn, voting_id).await?;
        match mean {
            Some(mean) => self.apply_rating(&txn, voting_id, movie_id, mean).await?,
            None => self.mark_closed(&txn, voting_id).await?,
        }
        UnitOfWork::commit(txn).await?;

        info!(voting_id, movie_id, ?mean, "Rating voting closed");
        Ok(Transition::Applied(mean))
    }

    async fn mark_closed<C: ConnectionTrait>(&self, conn: &C, voting_id: i32) -> AppResult<()> {
        self.voting_repo
            .update_status(conn, voting_id, VotingStatus::Inactive)
            .await?;
        self.poll_repo.close_by_voting_id(conn, voting_id).await?;
        Ok(())
    }

    async fn apply_rating<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
        movie_id: i64,
        mean: f64,
    ) -> AppResult<()> {
        self.mark_closed(conn, voting_id).await?;
        self.movie_repo.set_rating(conn, movie_id, mean).await
    }

    async fn apply_selection<C: ConnectionTrait + TransactionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
        winning_movie_id: i64,
        actor: i64,
        now: DateTime<Utc>,
    ) -> AppResult<SessionAttachment> {
        self.mark_closed(conn, voting_id).await?;

        let deadline = self.schedule.next_deadline(conn, now).await?;
        let (session, created) = self
            .session_repo
            .find_or_create_ongoing(conn, actor, deadline)
            .await?;
        self.session_repo
            .attach_movies(conn, session.id, &[winning_movie_id])
            .await?;
        Ok(SessionAttachment { session, created })
    }

    /// Cancel votings. Each id is handled on its own; a failure does not stop the rest.
    ///
    /// Cancelling a voting that is already closed or cancelled is a no-op.
    pub async fn cancel_by_voting_ids(
        &self,
        voting_ids: &[i32],
    ) -> Vec<(i32, AppResult<CancelOutcome>)> {
        let mut results = Vec::with_capacity(voting_ids.len());

        for &voting_id in voting_ids {
            let result = self.cancel_voting(voting_id).await;
            if let Err(e) = &result {
                warn!(voting_id, error = %e, "Failed to cancel voting");
            }
            results.push((voting_id, result));
        }

        results
    }

    async fn cancel_voting(&self, voting_id: i32) -> AppResult<CancelOutcome> {
        let txn = self.uow.begin().await?;

        let Some(voting) = self
            .voting_repo
            .find_by_id_for_update(&txn, voting_id)
            .await?
        else {
            return Ok(CancelOutcome::NotFound);
        };

        if voting.status.is_terminal() {
            debug!(voting_id, status = ?voting.status, "Voting already terminal");
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        self.voting_repo
            .update_status(&txn, voting_id, VotingStatus::Cancelled)
            .await?;
        self.poll_repo.close_by_voting_id(&txn, voting_id).await?;
        let poll = self.poll_repo.find_by_voting_id(&txn, voting_id).await?;
        UnitOfWork::commit(txn).await?;

        self.jobs
            .cancel_logged(&JobId::close_voting(voting.kind, voting_id))
            .await;
        if let Some(poll) = poll {
            self.delete_message_logged(poll.chat_id, poll.message_id)
                .await;
        }

        info!(voting_id, kind = ?voting.kind, "Voting cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Find votings with the given status.
    pub async fn find_votings_by_status(
        &self,
        status: VotingStatus,
    ) -> AppResult<Vec<voting::Model>> {
        self.voting_repo
            .find_by_status(self.uow.connection(), status)
            .await
    }

    /// Handle a fired close job of a selection voting.
    pub async fn close_selection_voting(
        &self,
        payload: &CloseVotingPayload,
        now: DateTime<Utc>,
    ) -> AppResult<JobOutcome> {
        let Some(voting) = self.open_voting(payload.voting_id).await? else {
            return Ok(JobOutcome::Done);
        };

        self.delete_message_logged(payload.chat_id, payload.message_id)
            .await;

        let winner = match self
            .close_selection_tally(voting.id, payload.user_id, now)
            .await?
        {
            Transition::Applied(Some(winner)) => winner,
            Transition::Applied(None) => {
                self.announce(
                    payload.chat_id,
                    &format!("Voting \"{}\" closed without votes.", voting.title),
                )
                .await;
                return Ok(JobOutcome::Done);
            }
            Transition::AlreadyTerminal(status) => {
                debug!(voting_id = voting.id, ?status, "Voting closed concurrently");
                return Ok(JobOutcome::Done);
            }
        };

        let title = self.movie_title(winner.movie_id).await?;
        self.announce(
            payload.chat_id,
            &format!(
                "The decision is made! The winner is {title} with {} votes.",
                winner.vote_count
            ),
        )
        .await;

        let session = &winner.attachment.session;
        let now_ts = now.timestamp();
        if winner.attachment.created {
            self.jobs
                .schedule_once_logged(
                    Job::FinishSession(FinishSessionPayload {
                        session_id: session.id,
                    }),
                    session.finished_at,
                    now_ts,
                )
                .await;
        }

        self.jobs
            .schedule_once_logged(
                Job::OpenRatingVoting(OpenRatingVotingPayload {
                    chat_id: payload.chat_id,
                    session_id: session.id,
                    movie: MovieRef {
                        id: winner.movie_id,
                        title,
                    },
                    user_id: payload.user_id,
                }),
                session.finished_at,
                now_ts,
            )
            .await;

        Ok(JobOutcome::Done)
    }

    /// Handle a fired close job of a rating voting.
    pub async fn close_rating_voting(
        &self,
        payload: &CloseVotingPayload,
        _now: DateTime<Utc>,
    ) -> AppResult<JobOutcome> {
        let Some(voting) = self.open_voting(payload.voting_id).await? else {
            return Ok(JobOutcome::Done);
        };

        let movie_id = payload.movie_id.or(voting.movie_id).ok_or_else(|| {
            AppError::Validation(format!("Rating voting {} has no movie", voting.id))
        })?;

        self.delete_message_logged(payload.chat_id, payload.message_id)
            .await;

        let title = self.movie_title(movie_id).await?;
        match self.close_rating_tally(voting.id, movie_id).await? {
            Transition::Applied(None) => {
                self.announce(
                    payload.chat_id,
                    &format!("Nobody rated {title}, the rating stays unset."),
                )
                .await;
            }
            Transition::Applied(Some(mean)) => {
                self.announce(
                    payload.chat_id,
                    &format!("Voting finished! {title} is rated {mean:.2}."),
                )
                .await;
            }
            Transition::AlreadyTerminal(status) => {
                debug!(voting_id = voting.id, ?status, "Voting closed concurrently");
            }
        }

        Ok(JobOutcome::Done)
    }

    /// Handle a fired open rating voting job.
    ///
    /// Stale jobs are dropped: the session was cancelled, the movie was removed from it,
    /// or its rating voting already exists.
    pub async fn open_rating_voting(
        &self,
        payload: &OpenRatingVotingPayload,
        now: DateTime<Utc>,
    ) -> AppResult<JobOutcome> {
        let conn = self.uow.connection();
        let session_id = payload.session_id;
        let movie_id = payload.movie.id;

        let Some(session) = self.session_repo.find_by_id(conn, session_id).await? else {
            warn!(session_id, "Session of rating job not found");
            return Ok(JobOutcome::Done);
        };

        if session.status == SessionStatus::Cancelled {
            debug!(session_id, movie_id, "Session cancelled, skipping rating voting");
            return Ok(JobOutcome::Done);
        }

        let now_ts = now.timestamp();
        if session.status == SessionStatus::Ongoing
            && session.finished_at > now_ts + DEADLINE_TOLERANCE_SECS
        {
            debug!(
                session_id,
                movie_id,
                until = session.finished_at,
                "Session moved, deferring rating voting"
            );
            return Ok(JobOutcome::Deferred {
                until: session.finished_at,
            });
        }

        if !self
            .session_repo
            .movie_ids(conn, session_id)
            .await?
            .contains(&movie_id)
        {
            debug!(session_id, movie_id, "Movie left the session, skipping rating voting");
            return Ok(JobOutcome::Done);
        }

        if let Some(existing) = self
            .voting_repo
            .find_rating_for_session_movie(conn, session_id, movie_id)
            .await?
        {
            debug!(
                session_id,
                movie_id,
                voting_id = existing.id,
                "Rating voting already exists"
            );
            return Ok(JobOutcome::Done);
        }

        let duration = i64::try_from(self.config.rating_duration().as_secs()).unwrap_or(i64::MAX);
        self.start_voting(
            StartVotingInput {
                title: rating_title(&payload.movie.title),
                kind: VotingKind::Rating,
                created_by: payload.user_id,
                chat_id: payload.chat_id,
                deadline: now_ts.saturating_add(duration),
                movie_id: Some(movie_id),
                session_id: Some(session_id),
                options: Vec::new(),
            },
            now,
        )
        .await?;

        Ok(JobOutcome::Done)
    }

    /// Restore the close jobs of active votings, replacing archived ones. Returns how many
    /// were enqueued.
    pub async fn reconcile_close_jobs(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let conn = self.uow.connection();
        let mut enqueued = 0;

        for voting in self
            .voting_repo
            .find_by_status(conn, VotingStatus::Active)
            .await?
        {
            let Some(poll) = self.poll_repo.find_by_voting_id(conn, voting.id).await? else {
                warn!(voting_id = voting.id, "Active voting without poll");
                continue;
            };

            match self
                .jobs
                .ensure_scheduled(
                    Job::close_voting(voting.kind, close_payload(&voting, &poll)),
                    voting.finished_at,
                    now.timestamp(),
                )
                .await
            {
                Ok(true) => enqueued += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(voting_id = voting.id, error = %e, "Failed to restore close job");
                }
            }
        }

        Ok(enqueued)
    }

    async fn lock_voting<C: ConnectionTrait>(
        &self,
        conn: &C,
        voting_id: i32,
    ) -> AppResult<voting::Model> {
        self.voting_repo
            .find_by_id_for_update(conn, voting_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Voting not found: {voting_id}")))
    }

    /// The voting a close job refers to, `None` if it is gone or already terminal.
    async fn open_voting(&self, voting_id: i32) -> AppResult<Option<voting::Model>> {
        match self
            .voting_repo
            .find_by_id(self.uow.connection(), voting_id)
            .await?
        {
            None => {
                warn!(voting_id, "Voting of close job not found");
                Ok(None)
            }
            Some(voting) if voting.status.is_terminal() => {
                debug!(voting_id, status = ?voting.status, "Voting already terminal, skipping close job");
                Ok(None)
            }
            Some(voting) => Ok(Some(voting)),
        }
    }

    async fn movie_title(&self, movie_id: i64) -> AppResult<String> {
        Ok(self
            .movie_repo
            .find_by_id(self.uow.connection(), movie_id)
            .await?
            .map_or_else(|| format!("#{movie_id}"), |movie| movie.title))
    }

    async fn announce(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.chat.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to send announcement");
        }
    }

    async fn delete_message_logged(&self, chat_id: i64, message_id: i32) {
        if let Err(e) = self.chat.delete_message(chat_id, message_id).await {
            warn!(chat_id, message_id, error = %e, "Failed to delete poll message");
        }
    }
}

/// Options of a rating poll: "1" to "10".
fn rating_labels() -> Vec<String> {
    (1..=crate::services::vote::MAX_RATING)
        .map(|rating| rating.to_string())
        .collect()
}

/// Question of a rating poll, cut to fit a voting title.
fn rating_title(movie_title: &str) -> String {
    const PREFIX: &str = "Rate the movie: ";
    const ELLIPSIS: char = '…';

    let room = TITLE_MAX_CHARS - PREFIX.chars().count();
    if movie_title.chars().count() <= room {
        return format!("{PREFIX}{movie_title}");
    }
    let cut: String = movie_title.chars().take(room - 1).collect();
    format!("{PREFIX}{cut}{ELLIPSIS}")
}

fn close_payload(voting: &voting::Model, poll: &poll::Model) -> CloseVotingPayload {
    CloseVotingPayload {
        poll_id: poll.external_poll_id.clone(),
        message_id: poll.message_id,
        chat_id: poll.chat_id,
        voting_id: voting.id,
        movie_id: voting.movie_id,
        user_id: voting.created_by,
    }
}
